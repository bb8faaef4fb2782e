//! Out-of-band call transfer.
//!
//! Escalation redirects the live call through the telephony provider's REST
//! API, dialing the restaurant's transfer number. The session rolls its
//! transfer latch back when this fails, so the error is re-raised here rather
//! than swallowed.

use async_trait::async_trait;

use voice_order_config::Settings;

use crate::ServerError;

#[async_trait]
pub trait CallTransfer: Send + Sync {
    async fn transfer(&self, call_id: &str) -> Result<(), ServerError>;
}

/// REST-backed transfer against the telephony provider.
pub struct TelephonyTransfer {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    api_base: String,
    transfer_number: String,
}

impl TelephonyTransfer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            account_sid: settings.telephony.account_sid.clone(),
            auth_token: settings.telephony.auth_token.clone(),
            api_base: settings.telephony.api_base.clone(),
            transfer_number: settings.restaurant.transfer_number.clone(),
        }
    }
}

fn dial_twiml(number: &str) -> String {
    format!("<Response><Dial>{number}</Dial></Response>")
}

#[async_trait]
impl CallTransfer for TelephonyTransfer {
    async fn transfer(&self, call_id: &str) -> Result<(), ServerError> {
        let url = format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_id
        );

        tracing::info!(
            call_id = %call_id,
            number = %self.transfer_number,
            "redirecting call to a human"
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("twiml", dial_twiml(&self.transfer_number))])
            .send()
            .await
            .map_err(|e| ServerError::Transfer(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServerError::Transfer(format!(
                "redirect returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_twiml_shape() {
        assert_eq!(
            dial_twiml("+19495550100"),
            "<Response><Dial>+19495550100</Dial></Response>"
        );
    }
}
