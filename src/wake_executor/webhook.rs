//! Webhook `WakeExecutor` variant (spec §6): POST `{address, handler}` to
//! `handler.url` with the attempt's own deadline as the request timeout.

use std::time::Duration;

use crate::error::WakeError;
use crate::model::WakeProfile;

pub async fn wake_webhook(
    client: &reqwest::Client,
    url: &str,
    profile: &WakeProfile,
    deadline: Duration,
) -> Result<(), WakeError> {
    let response = client.post(url).json(profile).timeout(deadline).send().await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(WakeError::WebhookStatus(response.status().as_u16()))
    }
}
