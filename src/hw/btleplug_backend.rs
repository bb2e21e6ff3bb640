use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument};

use super::hardware::{DeviceTransport, FragmentStream, WriteMode};
use crate::error::TransportError;
use crate::protocol::{
    EndpointId, characteristic_endpoints, endpoint_for_uuid, endpoint_metadata,
};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Scan settings for the real BLE transport.
#[derive(Debug, Clone, Builder)]
pub struct BtleplugTransportConfig {
    /// Required local-name prefix; empty accepts any name.
    #[builder(default, into)]
    name_prefix: String,
    #[builder(default = Duration::from_secs(10))]
    scan_timeout: Duration,
}

impl Default for BtleplugTransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Device transport backed by `btleplug`.
///
/// The first connect scans for a matching controller; later reconnects reuse
/// the discovered peripheral.
#[derive(Debug)]
pub struct BtleplugTransport {
    manager: Manager,
    config: BtleplugTransportConfig,
    peripheral: Option<Peripheral>,
    characteristics_by_endpoint: HashMap<EndpointId, Characteristic>,
}

impl BtleplugTransport {
    /// Creates the real BLE transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Ble`] when the platform manager is unavailable.
    pub async fn new(config: BtleplugTransportConfig) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        Ok(Self {
            manager,
            config,
            peripheral: None,
            characteristics_by_endpoint: HashMap::new(),
        })
    }

    #[instrument(skip(self), level = "debug", fields(prefix = %self.config.name_prefix))]
    async fn find_first_matching(&self) -> Result<Peripheral, TransportError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");
        for adapter in &adapters {
            adapter.start_scan(ScanFilter::default()).await?;
        }

        let deadline = Instant::now() + self.config.scan_timeout;
        let found = loop {
            if let Some(peripheral) = self.matching_peripheral(&adapters).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        for adapter in &adapters {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }

        found.ok_or_else(|| TransportError::DeviceNotFound {
            prefix: self.config.name_prefix.clone(),
            timeout_ms: u64::try_from(self.config.scan_timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn matching_peripheral(
        &self,
        adapters: &[Adapter],
    ) -> Result<Option<Peripheral>, TransportError> {
        for adapter in adapters {
            for peripheral in adapter.peripherals().await? {
                let Some(properties) = peripheral.properties().await? else {
                    continue;
                };
                let advertised: Vec<String> = properties
                    .services
                    .iter()
                    .map(|uuid| uuid.to_string().to_lowercase())
                    .collect();
                if matches_advertisement(
                    properties.local_name.as_deref(),
                    &advertised,
                    &self.config.name_prefix,
                ) {
                    info!(
                        device_id = %peripheral.id(),
                        local_name = ?properties.local_name,
                        rssi = ?properties.rssi,
                        "found matching controller"
                    );
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }

    async fn adapters(&self) -> Result<Vec<Adapter>, TransportError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(TransportError::NoAdapters);
        }
        Ok(adapters)
    }

    fn peripheral(&self) -> Result<&Peripheral, TransportError> {
        self.peripheral.as_ref().ok_or(TransportError::NotConnected)
    }

    fn characteristic_for(&self, endpoint: EndpointId) -> Result<&Characteristic, TransportError> {
        self.characteristics_by_endpoint
            .get(&endpoint)
            .ok_or(TransportError::MissingEndpoint { endpoint })
    }
}

#[async_trait]
impl DeviceTransport for BtleplugTransport {
    async fn is_connected(&self) -> Result<bool, TransportError> {
        match &self.peripheral {
            Some(peripheral) => Ok(peripheral.is_connected().await?),
            None => Ok(false),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&mut self) -> Result<(), TransportError> {
        let peripheral = match self.peripheral.take() {
            Some(peripheral) => peripheral,
            None => self.find_first_matching().await?,
        };
        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|error| TransportError::ConnectFailed {
                    reason: error.to_string(),
                })?;
        }
        info!(device_id = %peripheral.id(), "connected to controller");
        self.peripheral = Some(peripheral);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.characteristics_by_endpoint.clear();
        if let Some(peripheral) = &self.peripheral
            && peripheral.is_connected().await?
        {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn discover(&mut self) -> Result<(), TransportError> {
        let peripheral = self.peripheral()?;
        peripheral.discover_services().await?;

        let mut characteristics_by_endpoint = HashMap::new();
        for service in peripheral.services() {
            for characteristic in &service.characteristics {
                let uuid = characteristic.uuid.to_string();
                if let Some(endpoint) = endpoint_for_uuid(&uuid) {
                    characteristics_by_endpoint
                        .entry(endpoint)
                        .or_insert_with(|| characteristic.clone());
                }
            }
        }

        for endpoint in characteristic_endpoints() {
            if characteristics_by_endpoint.contains_key(&endpoint) {
                continue;
            }
            if matches!(
                endpoint,
                EndpointId::WriteCharacteristic | EndpointId::NotifyCharacteristic
            ) {
                return Err(TransportError::MissingEndpoint { endpoint });
            }
            debug!(%endpoint, "optional characteristic not offered by controller");
        }
        debug!(
            resolved = characteristics_by_endpoint.len(),
            "resolved controller characteristics"
        );
        self.characteristics_by_endpoint = characteristics_by_endpoint;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(?endpoint))]
    async fn read(&self, endpoint: EndpointId) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic_for(endpoint)?;
        Ok(self.peripheral()?.read(characteristic).await?)
    }

    #[instrument(skip(self, payload), level = "trace", fields(?endpoint, ?mode, payload_len = payload.len()))]
    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(endpoint)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral()?
            .write(characteristic, payload, write_type)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(?endpoint))]
    async fn subscribe(&self, endpoint: EndpointId) -> Result<FragmentStream, TransportError> {
        let characteristic = self.characteristic_for(endpoint)?;
        let peripheral = self.peripheral()?;
        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(characteristic).await?;

        let expected_uuid = characteristic.uuid;
        Ok(Box::pin(notifications.filter_map(move |notification| {
            (notification.uuid == expected_uuid).then_some(notification.value)
        })))
    }
}

/// Accepts a peripheral whose name carries the prefix and which advertises
/// the control service.
fn matches_advertisement(
    local_name: Option<&str>,
    advertised_services: &[String],
    name_prefix: &str,
) -> bool {
    let name_matches =
        name_prefix.is_empty() || local_name.is_some_and(|value| value.starts_with(name_prefix));
    if !name_matches {
        return false;
    }

    let control_uuid = endpoint_metadata(EndpointId::ControlService).uuid();
    advertised_services
        .iter()
        .any(|uuid| uuid.eq_ignore_ascii_case(control_uuid))
}
