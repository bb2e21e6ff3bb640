use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Largest write the controller's link accepts in one transport fragment.
pub(crate) const TRANSPORT_CHUNK_SIZE: usize = 20;

/// Known MA Touch protocol endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// MA Touch primary control service.
    #[strum(to_string = "control_service")]
    ControlService,
    /// Characteristic holding the firmware version string.
    #[strum(to_string = "version_characteristic")]
    VersionCharacteristic,
    /// Characteristic holding the software version string.
    #[strum(to_string = "software_characteristic")]
    SoftwareCharacteristic,
    /// Characteristic used for command writes.
    #[strum(to_string = "write_characteristic")]
    WriteCharacteristic,
    /// Characteristic used for reply notifications.
    #[strum(to_string = "notify_characteristic")]
    NotifyCharacteristic,
}

/// Endpoint category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum EndpointKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
    kind: EndpointKind,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID in lowercase hyphenated form.
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }

    pub(crate) fn kind(self) -> EndpointKind {
        self.kind
    }
}

static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> = LazyLock::new(|| {
    EndpointId::iter()
        .map(|endpoint| (endpoint, metadata_for(endpoint)))
        .collect()
});

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Returns all known characteristic endpoints.
pub(crate) fn characteristic_endpoints() -> impl Iterator<Item = EndpointId> {
    EndpointId::iter()
        .filter(|endpoint| endpoint_metadata(*endpoint).kind() == EndpointKind::Characteristic)
}

/// Resolves a UUID string to a known endpoint, ignoring case.
pub(crate) fn endpoint_for_uuid(uuid: &str) -> Option<EndpointId> {
    EndpointId::iter().find(|endpoint| {
        endpoint_metadata(*endpoint)
            .uuid()
            .eq_ignore_ascii_case(uuid)
    })
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::ControlService => EndpointMetadata {
            name: "MA Touch control service",
            uuid: "0277df18-e796-11e6-bf01-fe55135034f3",
            kind: EndpointKind::Service,
        },
        EndpointId::VersionCharacteristic => EndpointMetadata {
            name: "MA Touch firmware version",
            uuid: "799e3b22-e797-11e6-bf01-fe55135034f3",
            kind: EndpointKind::Characteristic,
        },
        EndpointId::SoftwareCharacteristic => EndpointMetadata {
            name: "MA Touch software version",
            uuid: "def9382a-e795-11e6-bf01-fe55135034f3",
            kind: EndpointKind::Characteristic,
        },
        EndpointId::WriteCharacteristic => EndpointMetadata {
            name: "MA Touch command write",
            uuid: "e48c1528-e795-11e6-bf01-fe55135034f3",
            kind: EndpointKind::Characteristic,
        },
        EndpointId::NotifyCharacteristic => EndpointMetadata {
            name: "MA Touch reply notify",
            uuid: "ea1ea690-e795-11e6-bf01-fe55135034f3",
            kind: EndpointKind::Characteristic,
        },
    }
}
