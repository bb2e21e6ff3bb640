mod painter;
mod snapshot_view;
mod table;

pub(crate) use self::painter::Painter;
pub(crate) use self::snapshot_view::{CycleLineView, SnapshotView};
