//! `tether send DEVICE ATTRIBUTE VALUE`.

use tether_core::{DeviceCommand, DeviceId};

use crate::cli::SendArgs;
use crate::error::CliError;

use super::{Context, parse_value};

pub async fn handle(ctx: &Context, args: SendArgs) -> Result<(), CliError> {
    let session = ctx.authenticated_session(false).await?;
    let device = DeviceId::from(args.device);
    let command = DeviceCommand::new(args.attribute, parse_value(&args.value));

    let result = if args.no_suppress {
        session.send_command(&device, &command).await
    } else {
        session.send_command_suppressed(&device, &command, None).await
    };
    session.stop();
    let ack = result?;

    println!(
        "{} {} = {} (acknowledged {})",
        ack.device,
        ack.attribute,
        ack.value,
        ack.acknowledged_at.format("%H:%M:%S")
    );
    Ok(())
}
