//! `tether login`: exchange a username and password for a credentials blob.

use secrecy::SecretString;
use tracing::info;

use tether_core::persistence::session_key;

use crate::cli::LoginArgs;
use crate::error::CliError;

use super::Context;

pub async fn handle(ctx: &Context, args: LoginArgs) -> Result<(), CliError> {
    let username = args
        .username
        .or_else(|| ctx.username.clone())
        .ok_or_else(|| CliError::Validation {
            field: "username".into(),
            reason: "pass --username or set it in the profile".into(),
        })?;

    let password = match std::env::var("TETHER_PASSWORD") {
        Ok(pw) => SecretString::from(pw),
        Err(_) => SecretString::from(rpassword::prompt_password(format!(
            "Password for {username}: "
        ))?),
    };

    let endpoint = ctx.endpoint()?;
    let blob = endpoint.login(&username, &password).await?;
    ctx.blobs
        .save(&session_key(&ctx.session.session_id), &blob)?;

    info!(profile = %ctx.profile_name, "credentials stored");
    println!("Logged in as {username} ({})", ctx.url);
    Ok(())
}
