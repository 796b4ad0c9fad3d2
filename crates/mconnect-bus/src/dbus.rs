//! zbus backend for the mconnect service on the session bus.
//!
//! ## D-Bus Interface
//!
//! - **Bus**: session bus (`org.mconnect` by default)
//! - **Manager**: `/org/mconnect/manager`, `org.mconnect.DeviceManager`
//! - **Devices**: one object per device, `org.mconnect.Device` plus
//!   `org.mconnect.Device.Battery` and `org.mconnect.Device.Findmyphone`
//!
//! Property changes arrive as `org.freedesktop.DBus.Properties.PropertiesChanged`.
//! Each signal is one notification batch built from the values the signal
//! carries. Only invalidated or mistyped properties are read back through
//! uncached proxies.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use mconnect_types::{DeviceId, DeviceRecord, Field, PropertyChange};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::fdo::{DBusProxy, PropertiesChanged, PropertiesProxy};
use zbus::names::{BusName, WellKnownName};
use zbus::proxy::CacheProperties;
use zbus::zvariant::{OwnedObjectPath, Value};
use zbus::Connection;

use crate::error::BusError;
use crate::{NameOwner, RemoteSignal, ServiceBus, EVENT_CHANNEL_CAPACITY};

const DEVICE_INTERFACE: &str = "org.mconnect.Device";
const BATTERY_INTERFACE: &str = "org.mconnect.Device.Battery";
const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// Proxy for the device manager.
#[zbus::proxy(
    interface = "org.mconnect.DeviceManager",
    default_service = "org.mconnect",
    default_path = "/org/mconnect/manager"
)]
trait DeviceManager {
    /// Object paths of all known devices.
    fn list_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    fn allow_device(&self, path: &str) -> zbus::Result<()>;

    fn disallow_device(&self, path: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn device_added(&self, path: String) -> zbus::Result<()>;

    #[zbus(signal)]
    fn device_removed(&self, path: String) -> zbus::Result<()>;
}

/// Proxy for a single device object.
#[zbus::proxy(interface = "org.mconnect.Device", default_service = "org.mconnect")]
trait MconnectDevice {
    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn device_type(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn is_connected(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn is_paired(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn allowed(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn incoming_capabilities(&self) -> zbus::Result<Vec<String>>;

    #[zbus(property)]
    fn outgoing_capabilities(&self) -> zbus::Result<Vec<String>>;
}

/// Proxy for a device's battery.
#[zbus::proxy(interface = "org.mconnect.Device.Battery", default_service = "org.mconnect")]
trait Battery {
    #[zbus(property)]
    fn level(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn charging(&self) -> zbus::Result<bool>;
}

/// Proxy for a device's find-my-phone action.
#[zbus::proxy(interface = "org.mconnect.Device.Findmyphone", default_service = "org.mconnect")]
trait Findmyphone {
    fn ring(&self) -> zbus::Result<()>;
}

impl From<zbus::Error> for BusError {
    fn from(e: zbus::Error) -> Self {
        Self::Other(anyhow::Error::new(e))
    }
}

impl From<zbus::fdo::Error> for BusError {
    fn from(e: zbus::fdo::Error) -> Self {
        Self::Other(anyhow::Error::new(e))
    }
}

/// Session-bus backend talking to a running mconnect service.
#[derive(Clone)]
pub struct ZbusServiceBus {
    connection: Connection,
    bus_name: String,
}

impl ZbusServiceBus {
    /// Connect to the session bus.
    pub async fn session(bus_name: impl Into<String>) -> Result<Self, BusError> {
        let connection = Connection::session()
            .await
            .map_err(|e| BusError::TransportUnavailable(e.to_string()))?;
        Ok(Self {
            connection,
            bus_name: bus_name.into(),
        })
    }

    async fn manager(&self) -> Result<DeviceManagerProxy<'static>, BusError> {
        Ok(DeviceManagerProxy::builder(&self.connection)
            .destination(self.bus_name.clone())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?)
    }

    async fn device(&self, path: &str) -> Result<MconnectDeviceProxy<'static>, BusError> {
        Ok(MconnectDeviceProxy::builder(&self.connection)
            .destination(self.bus_name.clone())?
            .path(path.to_owned())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?)
    }

    async fn battery(&self, path: &str) -> Result<BatteryProxy<'static>, BusError> {
        Ok(BatteryProxy::builder(&self.connection)
            .destination(self.bus_name.clone())?
            .path(path.to_owned())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?)
    }

    fn call_error(&self, method: &'static str) -> impl FnOnce(zbus::Error) -> BusError + '_ {
        move |e| match &e {
            zbus::Error::MethodError(name, _, _) if name.as_str() == SERVICE_UNKNOWN => {
                BusError::ServiceUnknown(self.bus_name.clone())
            }
            _ => BusError::Call {
                method,
                reason: e.to_string(),
            },
        }
    }

    /// Read the full state of one device. Unreadable properties are left
    /// empty for the caller to default.
    async fn fetch_record(&self, path: &str) -> Result<DeviceRecord, BusError> {
        let device = self.device(path).await?;
        let battery = self.battery(path).await?;

        let mut record = DeviceRecord {
            id: Some(DeviceId::from(path)),
            ..DeviceRecord::default()
        };
        record.name = readable(device.name().await, path, "Name");
        record.device_type = readable(device.device_type().await, path, "DeviceType");
        record.connected = readable(device.is_connected().await, path, "IsConnected");
        record.paired = readable(device.is_paired().await, path, "IsPaired");
        record.allowed = readable(device.allowed().await, path, "Allowed");
        record.plugins = self.plugins(&device, path).await;
        record.battery_level = readable(battery.level().await, path, "Level").map(i64::from);
        record.battery_charging = readable(battery.charging().await, path, "Charging");
        Ok(record)
    }

    async fn plugins(&self, device: &MconnectDeviceProxy<'_>, path: &str) -> Option<Vec<String>> {
        let incoming = readable(device.incoming_capabilities().await, path, "IncomingCapabilities");
        let outgoing = readable(device.outgoing_capabilities().await, path, "OutgoingCapabilities");
        if incoming.is_none() && outgoing.is_none() {
            return None;
        }
        let mut plugins: Vec<String> = incoming.into_iter().chain(outgoing).flatten().collect();
        plugins.sort();
        plugins.dedup();
        Some(plugins)
    }

    /// Subscribe to a device's property changes and seed the piecewise
    /// state. The subscription is live before this returns.
    async fn open_device(&self, path: &str) -> Result<DeviceStream, BusError> {
        let properties: PropertiesProxy<'static> = PropertiesProxy::builder(&self.connection)
            .destination(self.bus_name.clone())?
            .path(path.to_owned())?
            .build()
            .await?;
        let changes = properties.receive_properties_changed().await?.boxed();

        let device = self.device(path).await?;
        let battery = self.battery(path).await?;
        let pieces = PieceState {
            incoming: readable(device.incoming_capabilities().await, path, "IncomingCapabilities")
                .unwrap_or_default(),
            outgoing: readable(device.outgoing_capabilities().await, path, "OutgoingCapabilities")
                .unwrap_or_default(),
            level: readable(battery.level().await, path, "Level").map(i64::from),
            charging: readable(battery.charging().await, path, "Charging").unwrap_or(false),
        };
        debug!(device = %path, "watching device properties");
        Ok(DeviceStream { changes, pieces })
    }

    /// Read one property back from the service after a signal
    /// invalidated it or carried no usable value.
    async fn reread(
        &self,
        path: &str,
        field: Field,
        pieces: &mut PieceState,
    ) -> Result<Option<PropertyChange>, BusError> {
        let change = match field {
            Field::Name => {
                let device = self.device(path).await?;
                readable(device.name().await, path, "Name").map(PropertyChange::Name)
            }
            Field::Active => {
                let device = self.device(path).await?;
                readable(device.is_connected().await, path, "IsConnected").map(PropertyChange::Active)
            }
            Field::Paired => {
                let device = self.device(path).await?;
                readable(device.is_paired().await, path, "IsPaired").map(PropertyChange::Paired)
            }
            Field::Allowed => {
                let device = self.device(path).await?;
                readable(device.allowed().await, path, "Allowed").map(PropertyChange::Allowed)
            }
            Field::Plugins => {
                let device = self.device(path).await?;
                pieces.incoming =
                    readable(device.incoming_capabilities().await, path, "IncomingCapabilities")
                        .unwrap_or_default();
                pieces.outgoing =
                    readable(device.outgoing_capabilities().await, path, "OutgoingCapabilities")
                        .unwrap_or_default();
                Some(PropertyChange::Plugins(pieces.plugins()))
            }
            Field::Battery => {
                let battery = self.battery(path).await?;
                pieces.level = readable(battery.level().await, path, "Level").map(i64::from);
                pieces.charging =
                    readable(battery.charging().await, path, "Charging").unwrap_or(false);
                Some(pieces.battery())
            }
        };
        Ok(change)
    }

    fn spawn_device_pump(
        &self,
        path: String,
        device: DeviceStream,
        tx: mpsc::Sender<RemoteSignal>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.clone().pump_device(path, device, tx))
    }

    /// Forward one device's property changes, one batch per signal.
    async fn pump_device(self, path: String, device: DeviceStream, tx: mpsc::Sender<RemoteSignal>) {
        let DeviceStream {
            mut changes,
            mut pieces,
        } = device;

        while let Some(signal) = changes.next().await {
            let decoded = match signal.args() {
                Ok(args) => pieces.decode(
                    args.interface_name().as_str(),
                    args.changed_properties(),
                    args.invalidated_properties(),
                ),
                Err(e) => {
                    warn!(device = %path, error = %e, "undecodable PropertiesChanged");
                    continue;
                }
            };

            let mut batch = Vec::with_capacity(decoded.len());
            for item in decoded {
                match item {
                    Decoded::Change(change) => batch.push(change),
                    Decoded::Reread(field) => match self.reread(&path, field, &mut pieces).await {
                        Ok(change) => batch.extend(change),
                        Err(e) => warn!(device = %path, %field, error = %e, "failed to re-read property"),
                    },
                }
            }
            if batch.is_empty() {
                continue;
            }
            let signal = RemoteSignal::Changed {
                id: DeviceId::from(path.as_str()),
                changes: batch,
            };
            if tx.send(signal).await.is_err() {
                break;
            }
        }
        debug!(device = %path, "device property watch ended");
    }
}

/// A live property subscription for one device.
struct DeviceStream {
    changes: BoxStream<'static, PropertiesChanged>,
    pieces: PieceState,
}

/// One entry decoded from a `PropertiesChanged` signal.
#[derive(Debug, PartialEq, Eq)]
enum Decoded {
    Change(PropertyChange),
    /// Named by the signal without a usable value.
    Reread(Field),
}

/// Last known values of the properties the service reports piecewise
/// but the registry consumes whole.
#[derive(Debug, Default)]
struct PieceState {
    incoming: Vec<String>,
    outgoing: Vec<String>,
    level: Option<i64>,
    charging: bool,
}

impl PieceState {
    fn plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> = self.incoming.iter().chain(&self.outgoing).cloned().collect();
        plugins.sort();
        plugins.dedup();
        plugins
    }

    fn battery(&self) -> PropertyChange {
        match self.level {
            Some(level) => PropertyChange::Battery {
                level,
                charging: self.charging,
            },
            None => PropertyChange::BatteryUnavailable,
        }
    }

    /// Turn one signal into changes, using the values it carries.
    /// Invalidated or mistyped properties are left for a re-read.
    fn decode(
        &mut self,
        interface: &str,
        changed: &HashMap<&str, Value<'_>>,
        invalidated: &[&str],
    ) -> Vec<Decoded> {
        let mut decoded = Vec::new();
        let mut reread: Vec<Field> = invalidated
            .iter()
            .filter_map(|name| field_for(interface, name))
            .collect();

        match interface {
            DEVICE_INTERFACE => {
                if let Some(value) = changed.get("Name") {
                    match as_string(value) {
                        Some(name) => decoded.push(Decoded::Change(PropertyChange::Name(name))),
                        None => reread.push(Field::Name),
                    }
                }

                let flags: [(&str, Field, fn(bool) -> PropertyChange); 3] = [
                    ("IsConnected", Field::Active, PropertyChange::Active),
                    ("IsPaired", Field::Paired, PropertyChange::Paired),
                    ("Allowed", Field::Allowed, PropertyChange::Allowed),
                ];
                for (name, field, make) in flags {
                    if let Some(value) = changed.get(name) {
                        match value {
                            Value::Bool(flag) => decoded.push(Decoded::Change(make(*flag))),
                            _ => reread.push(field),
                        }
                    }
                }

                let mut plugins = false;
                for (name, slot) in [
                    ("IncomingCapabilities", &mut self.incoming),
                    ("OutgoingCapabilities", &mut self.outgoing),
                ] {
                    if let Some(value) = changed.get(name) {
                        match as_strings(value) {
                            Some(list) => {
                                *slot = list;
                                plugins = true;
                            }
                            None => reread.push(Field::Plugins),
                        }
                    }
                }
                if plugins && !reread.contains(&Field::Plugins) {
                    decoded.push(Decoded::Change(PropertyChange::Plugins(self.plugins())));
                }
            }
            BATTERY_INTERFACE => {
                let mut battery = false;
                if let Some(value) = changed.get("Level") {
                    match as_level(value) {
                        Some(level) => {
                            self.level = Some(level);
                            battery = true;
                        }
                        None => reread.push(Field::Battery),
                    }
                }
                if let Some(value) = changed.get("Charging") {
                    match value {
                        Value::Bool(charging) => {
                            self.charging = *charging;
                            battery = true;
                        }
                        _ => reread.push(Field::Battery),
                    }
                }
                if battery && !reread.contains(&Field::Battery) {
                    decoded.push(Decoded::Change(self.battery()));
                }
            }
            _ => {}
        }

        let mut seen = Vec::new();
        for field in reread {
            if !seen.contains(&field) {
                seen.push(field);
                decoded.push(Decoded::Reread(field));
            }
        }
        decoded
    }
}

fn field_for(interface: &str, name: &str) -> Option<Field> {
    match (interface, name) {
        (DEVICE_INTERFACE, "Name") => Some(Field::Name),
        (DEVICE_INTERFACE, "IsConnected") => Some(Field::Active),
        (DEVICE_INTERFACE, "IsPaired") => Some(Field::Paired),
        (DEVICE_INTERFACE, "Allowed") => Some(Field::Allowed),
        (DEVICE_INTERFACE, "IncomingCapabilities" | "OutgoingCapabilities") => Some(Field::Plugins),
        (BATTERY_INTERFACE, "Level" | "Charging") => Some(Field::Battery),
        _ => None,
    }
}

fn as_string(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.as_str().to_owned()),
        _ => None,
    }
}

fn as_strings(value: &Value<'_>) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items.iter().map(as_string).collect(),
        _ => None,
    }
}

fn as_level(value: &Value<'_>) -> Option<i64> {
    match value {
        Value::U32(n) => Some(i64::from(*n)),
        Value::I32(n) => Some(i64::from(*n)),
        Value::U8(n) => Some(i64::from(*n)),
        Value::I64(n) => Some(*n),
        _ => None,
    }
}

fn readable<T>(result: zbus::Result<T>, path: &str, property: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(device = %path, property, error = %e, "property unreadable");
            None
        }
    }
}

#[async_trait]
impl ServiceBus for ZbusServiceBus {
    async fn watch_name(&self, name: &str) -> Result<mpsc::Receiver<NameOwner>, BusError> {
        let dbus = DBusProxy::new(&self.connection)
            .await
            .map_err(|e| BusError::TransportUnavailable(e.to_string()))?;
        let mut changes = Box::pin(dbus.receive_name_owner_changed().await?);

        let bus_name = BusName::try_from(name.to_owned())
            .map_err(|e| BusError::Other(anyhow::anyhow!("invalid bus name {name}: {e}")))?;
        let initial = match dbus.get_name_owner(bus_name).await {
            Ok(owner) => Some(owner.to_string()),
            Err(zbus::fdo::Error::NameHasNoOwner(_)) => None,
            Err(e) => return Err(BusError::TransportUnavailable(e.to_string())),
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let _ = tx.send(NameOwner(initial)).await;

        let watched = name.to_owned();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(signal) = changes.next() => {
                        let Ok(args) = signal.args() else { continue };
                        if args.name().as_str() != watched {
                            continue;
                        }
                        let owner: &Option<zbus::names::UniqueName<'_>> = args.new_owner();
                        let owner = owner.as_ref().map(ToString::to_string);
                        debug!(name = %watched, owner = ?owner, "name owner changed");
                        if tx.send(NameOwner(owner)).await.is_err() {
                            break;
                        }
                    }
                    () = tx.closed() => break,
                    else => break,
                }
            }
        });

        Ok(rx)
    }

    async fn subscribe_devices(&self) -> Result<mpsc::Receiver<RemoteSignal>, BusError> {
        let manager = self.manager().await?;
        let mut added = Box::pin(manager.receive_device_added().await?);
        let mut removed = Box::pin(manager.receive_device_removed().await?);
        let existing = manager
            .list_devices()
            .await
            .map_err(self.call_error("ListDevices"))?;

        // Property streams of current devices are live before returning, so
        // a caller that enumerates next misses no change.
        let mut opened = Vec::with_capacity(existing.len());
        for path in existing {
            let path = path.to_string();
            match self.open_device(&path).await {
                Ok(device) => opened.push((path, device)),
                Err(e) => warn!(device = %path, error = %e, "failed to watch device properties"),
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let bus = self.clone();
        tokio::spawn(async move {
            let mut pumps: HashMap<String, JoinHandle<()>> = opened
                .into_iter()
                .map(|(path, device)| {
                    let handle = bus.spawn_device_pump(path.clone(), device, tx.clone());
                    (path, handle)
                })
                .collect();

            loop {
                tokio::select! {
                    Some(signal) = added.next() => {
                        let Ok(args) = signal.args() else { continue };
                        let path = args.path().clone();
                        if let Some(handle) = pumps.remove(&path) {
                            handle.abort();
                        }
                        // Subscribe, then read, then announce; the device's
                        // changes are forwarded only after its announcement.
                        let device = match bus.open_device(&path).await {
                            Ok(device) => device,
                            Err(e) => {
                                warn!(device = %path, error = %e, "failed to watch added device");
                                continue;
                            }
                        };
                        let record = match bus.fetch_record(&path).await {
                            Ok(record) => record,
                            Err(e) => {
                                warn!(device = %path, error = %e, "failed to read added device");
                                continue;
                            }
                        };
                        if tx.send(RemoteSignal::DeviceAdded(record)).await.is_err() {
                            break;
                        }
                        let handle = bus.spawn_device_pump(path.clone(), device, tx.clone());
                        pumps.insert(path, handle);
                    }
                    Some(signal) = removed.next() => {
                        let Ok(args) = signal.args() else { continue };
                        let path = args.path().clone();
                        if let Some(handle) = pumps.remove(&path) {
                            handle.abort();
                        }
                        if tx.send(RemoteSignal::DeviceRemoved(DeviceId::from(path))).await.is_err() {
                            break;
                        }
                    }
                    () = tx.closed() => break,
                    else => break,
                }
            }

            for (_, handle) in pumps {
                handle.abort();
            }
        });

        Ok(rx)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, BusError> {
        let manager = self.manager().await?;
        let paths = manager
            .list_devices()
            .await
            .map_err(self.call_error("ListDevices"))?;

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            records.push(self.fetch_record(path.as_str()).await?);
        }
        info!(count = records.len(), "enumerated devices");
        Ok(records)
    }

    async fn allow_device(&self, id: &DeviceId) -> Result<(), BusError> {
        self.manager()
            .await?
            .allow_device(id.as_str())
            .await
            .map_err(self.call_error("AllowDevice"))
    }

    async fn disallow_device(&self, id: &DeviceId) -> Result<(), BusError> {
        self.manager()
            .await?
            .disallow_device(id.as_str())
            .await
            .map_err(self.call_error("DisallowDevice"))
    }

    async fn locate_device(&self, id: &DeviceId) -> Result<(), BusError> {
        let proxy = FindmyphoneProxy::builder(&self.connection)
            .destination(self.bus_name.clone())?
            .path(id.as_str().to_owned())?
            .build()
            .await?;
        proxy.ring().await.map_err(self.call_error("Ring"))
    }

    async fn start_service(&self, name: &str) -> Result<(), BusError> {
        let dbus = DBusProxy::new(&self.connection).await?;
        let name = WellKnownName::try_from(name.to_owned())
            .map_err(|e| BusError::Other(anyhow::anyhow!("invalid bus name {name}: {e}")))?;
        dbus.start_service_by_name(name.clone(), 0).await?;
        info!(name = %name, "requested service start");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal<'a>(values: Vec<(&'a str, Value<'a>)>) -> HashMap<&'a str, Value<'a>> {
        values.into_iter().collect()
    }

    #[test]
    fn each_signal_carries_its_own_values() {
        let mut pieces = PieceState::default();
        let first = pieces.decode(DEVICE_INTERFACE, &signal(vec![("Allowed", Value::from(true))]), &[]);
        let second = pieces.decode(DEVICE_INTERFACE, &signal(vec![("Allowed", Value::from(false))]), &[]);
        assert_eq!(first, vec![Decoded::Change(PropertyChange::Allowed(true))]);
        assert_eq!(second, vec![Decoded::Change(PropertyChange::Allowed(false))]);
    }

    #[test]
    fn capabilities_merge_with_the_other_direction() {
        let mut pieces = PieceState {
            incoming: vec!["kdeconnect.battery".to_string()],
            ..PieceState::default()
        };
        let outgoing = Value::from(vec!["kdeconnect.findmyphone.request".to_string()]);
        let decoded = pieces.decode(
            DEVICE_INTERFACE,
            &signal(vec![("OutgoingCapabilities", outgoing)]),
            &[],
        );
        assert_eq!(
            decoded,
            vec![Decoded::Change(PropertyChange::Plugins(vec![
                "kdeconnect.battery".to_string(),
                "kdeconnect.findmyphone.request".to_string(),
            ]))]
        );
    }

    #[test]
    fn battery_level_alone_keeps_charging_state() {
        let mut pieces = PieceState {
            level: Some(40),
            charging: true,
            ..PieceState::default()
        };
        let decoded = pieces.decode(BATTERY_INTERFACE, &signal(vec![("Level", Value::from(41u32))]), &[]);
        assert_eq!(
            decoded,
            vec![Decoded::Change(PropertyChange::Battery {
                level: 41,
                charging: true,
            })]
        );
    }

    #[test]
    fn invalidated_and_mistyped_properties_are_reread() {
        let mut pieces = PieceState::default();
        let decoded = pieces.decode(
            DEVICE_INTERFACE,
            &signal(vec![("IsPaired", Value::from("yes"))]),
            &["Name", "IsPaired"],
        );
        assert_eq!(
            decoded,
            vec![Decoded::Reread(Field::Name), Decoded::Reread(Field::Paired)]
        );
    }

    #[test]
    fn unknown_properties_are_ignored() {
        let mut pieces = PieceState::default();
        let decoded = pieces.decode(DEVICE_INTERFACE, &signal(vec![("Color", Value::from(3u32))]), &["Color"]);
        assert!(decoded.is_empty());
    }
}
