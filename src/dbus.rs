use anyhow::{Context as _, Result};
use futures_lite::{Stream, StreamExt as _};
use zbus::{fdo::DBusProxy, names::OwnedBusName};

pub mod player;

/// Well-known name prefix shared by every MPRIS player
pub const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusActivity {
    Created,
    Destroyed,
}

/// D-Bus's activity parsed from `NameOwnerChanged` signal
pub struct BusChange {
    pub name: OwnedBusName,
    pub activity: BusActivity,
}
impl BusChange {
    pub const fn new(name: OwnedBusName, activity: BusActivity) -> Self {
        Self { name, activity }
    }
    pub fn is_mpris(&self) -> bool {
        is_mpris(&self.name)
    }
}

pub fn is_mpris(name: &str) -> bool {
    name.starts_with(MPRIS_PREFIX)
}

/// Player identifier derived from its bus name, e.g. `spotify` for
/// `org.mpris.MediaPlayer2.spotify`
pub fn player_id(name: &str) -> &str {
    name.strip_prefix(MPRIS_PREFIX).unwrap_or(name)
}

/// All MPRIS players currently on the bus
pub async fn player_buses(proxy: &DBusProxy<'_>) -> Result<Vec<OwnedBusName>> {
    Ok(proxy
        .list_names()
        .await
        .context("Failed to list currently-owned names on DBus")?
        .into_iter()
        .filter(|name| is_mpris(name))
        .collect())
}

/// Return a stream of MPRIS players appearing on or leaving the bus
pub async fn player_changes(
    proxy: DBusProxy<'static>,
) -> Result<impl Stream<Item = BusChange> + Send + 'static> {
    Ok(proxy
        .receive_name_owner_changed()
        .await
        .context("Failed to listen for NameOwnerChanged signal on DBus")?
        .filter_map(|s| {
            let args = s
                .args()
                .inspect_err(|e| tracing::warn!(?e, "Failed to parse NameOwnerChanged argument"))
                .ok()?;
            let change = match (args.new_owner.is_some(), args.old_owner.is_some()) {
                (true, false) => BusActivity::Created,
                (false, true) => BusActivity::Destroyed,
                _ => return None,
            };
            Some(BusChange::new(args.name.into(), change))
        })
        .filter(BusChange::is_mpris))
}
