//! `tether devices`: one full refresh, printed as a table.

use tabled::settings::Style;
use tabled::{Table, Tabled};

use tether_core::DeviceSnapshot;

use crate::error::CliError;

use super::Context;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "Online")]
    online: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&DeviceSnapshot> for DeviceRow {
    fn from(d: &DeviceSnapshot) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.clone().unwrap_or_default(),
            family: d.family.clone().unwrap_or_default(),
            online: if d.online { "yes" } else { "no" }.into(),
            updated: d.last_updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub async fn handle(ctx: &Context) -> Result<(), CliError> {
    let session = ctx.authenticated_session(false).await?;
    let outcome = session.data_refresh().await;
    session.stop();
    outcome?;

    let snapshots = session.snapshots();
    let mut devices: Vec<_> = snapshots.values().collect();
    devices.sort_by(|a, b| a.id.cmp(&b.id));

    if devices.is_empty() {
        println!("No devices.");
        return Ok(());
    }

    let rows: Vec<DeviceRow> = devices.iter().map(|d| DeviceRow::from(d.as_ref())).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}
