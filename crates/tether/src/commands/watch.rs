//! `tether watch`: run the session until Ctrl-C and print what arrives.

use std::sync::Arc;

use chrono::Local;
use futures_util::StreamExt;
use tracing::info;

use tether_core::{CommandAck, DependentHandler, DeviceId, DeviceUpdate, HandlerError};

use crate::cli::WatchArgs;
use crate::error::CliError;

use super::Context;

/// Prints every update for one device to stdout.
struct Printer {
    device: DeviceId,
}

impl Printer {
    fn line(&self, text: &str) {
        println!("{} {:<16} {text}", Local::now().format("%H:%M:%S"), self.device);
    }
}

impl DependentHandler for Printer {
    fn device_id(&self) -> &DeviceId {
        &self.device
    }

    fn on_snapshot_updated(&self, update: &DeviceUpdate) -> Result<(), HandlerError> {
        if let Some(ref snapshot) = update.snapshot {
            if update.attributes.is_empty() {
                let state = if snapshot.online { "online" } else { "offline" };
                let name = snapshot.name.as_deref().unwrap_or("-");
                self.line(&format!("snapshot: {name} ({state})"));
            }
        }
        for (attribute, value) in &update.attributes {
            self.line(&format!("{attribute} = {value}"));
        }
        for (kind, value) in &update.details {
            self.line(&format!("{kind}: {value}"));
        }
        if let Some(ref notifications) = update.notifications {
            for n in notifications {
                self.line(&format!("{} at {}", n.kind, n.next_at.with_timezone(&Local).format("%H:%M")));
            }
        }
        for activity in &update.activities {
            let heard = activity.transcript.as_deref().unwrap_or("");
            let said = activity.response.as_deref().unwrap_or("");
            self.line(&format!("heard \"{heard}\" replied \"{said}\""));
        }
        Ok(())
    }

    fn on_command_acknowledged(&self, ack: &CommandAck) -> Result<(), HandlerError> {
        self.line(&format!("ack {} = {}", ack.attribute, ack.value));
        Ok(())
    }
}

pub async fn handle(ctx: &Context, args: WatchArgs) -> Result<(), CliError> {
    let session = ctx.authenticated_session(true).await?;

    let targets: Vec<DeviceId> = if args.devices.is_empty() {
        session.data_refresh().await?;
        let mut ids: Vec<_> = session.snapshots().keys().cloned().collect();
        ids.sort();
        ids
    } else {
        args.devices.into_iter().map(DeviceId::from).collect()
    };

    if targets.is_empty() {
        session.stop();
        println!("No devices to watch.");
        return Ok(());
    }

    for device in targets {
        session.register(Arc::new(Printer { device })).await;
    }
    session.start();
    info!(profile = %ctx.profile_name, "watching; press Ctrl-C to stop");

    let mut statuses = session.status_stream();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let until = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(until);

    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => break,
            () = &mut until => break,
            Some(status) = statuses.next() => {
                println!("{} status: {status}", Local::now().format("%H:%M:%S"));
            }
        }
    }

    session.stop();
    session.join().await;
    Ok(())
}
