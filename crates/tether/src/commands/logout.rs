//! `tether logout`: end the remote session and delete stored credentials.

use std::sync::Arc;

use tracing::debug;

use tether_core::Session;

use crate::error::CliError;

use super::Context;

pub async fn handle(ctx: &Context) -> Result<(), CliError> {
    let mut config = ctx.session.clone();
    config.push_enabled = false;
    let session = Session::new(config, ctx.endpoint()?, Arc::clone(&ctx.blobs));

    // An expired session can still be forgotten locally.
    if let Err(e) = session.login_check().await {
        debug!(error = %e, "no live session to end remotely");
    }
    session.logout().await?;
    session.stop();

    println!("Logged out of profile '{}'", ctx.profile_name);
    Ok(())
}
