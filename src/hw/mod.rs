mod btleplug_backend;
mod fake_backend;
mod hardware;

pub use self::btleplug_backend::{BtleplugTransport, BtleplugTransportConfig};
pub use self::fake_backend::{
    FakeThermostat, FakeThermostatConfig, FakeThermostatProbe, StatusFixture,
};
pub use self::hardware::{DeviceTransport, FragmentStream, WriteMode};
