//! One module per delivery channel.

pub mod discord;
pub mod email;
pub mod webhook;

use crate::alerts::NotifyError;
use serde::Serialize;

/// POST a JSON body and treat any non-2xx answer as a failure.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    http: &reqwest::Client,
    channel: &'static str,
    url: &str,
    body: &T,
) -> Result<(), NotifyError> {
    let response = http.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Status { channel, status });
    }
    Ok(())
}
