//! Terminal escalation gateway.

use std::sync::Arc;

use async_trait::async_trait;
use healing::{EscalationRequest, GatewayError, HintRecord, HumanGateway};
use tracing::warn;

use crate::prompt::Prompter;

/// Asks the operator on the terminal.
///
/// An empty answer declines, `skip` or end of input defers (the run is
/// suspended and can be resumed with `dockerize resume --hint`).
pub struct CliGateway {
    prompter: Arc<Prompter>,
}

impl CliGateway {
    pub fn new(prompter: Arc<Prompter>) -> Self {
        Self { prompter }
    }
}

#[async_trait]
impl HumanGateway for CliGateway {
    async fn escalate(&self, request: &EscalationRequest) -> Result<HintRecord, GatewayError> {
        let banner = format!(
            "\n=== Escalation #{} ({}) ===\n{}\n",
            request.escalation_number, request.phase, request.summary
        );
        if let Err(e) = self.prompter.say(&banner).await {
            warn!(error = %e, "Could not show escalation; deferring");
            return Err(GatewayError::Deferred);
        }

        let answer = self
            .prompter
            .ask("Hint for the next attempt (empty to give up, `skip` to suspend): ")
            .await;
        match answer {
            Ok(Some(text)) if text.trim().eq_ignore_ascii_case("skip") => Err(GatewayError::Deferred),
            Ok(Some(text)) if text.trim().is_empty() => Err(GatewayError::Declined {
                reason: "operator gave no hint".to_string(),
            }),
            Ok(Some(text)) => Ok(HintRecord::new(text.trim())),
            Ok(None) => Err(GatewayError::Deferred),
            Err(e) => {
                warn!(error = %e, "Could not read hint; deferring");
                Err(GatewayError::Deferred)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healing::{LearningLedger, Phase};

    fn request() -> EscalationRequest {
        EscalationRequest::new(Phase::Healthcheck, "runtime budget exhausted", &LearningLedger::new(), 1)
    }

    fn gateway(input: &'static [u8]) -> CliGateway {
        CliGateway::new(Arc::new(Prompter::new(input, tokio::io::sink())))
    }

    #[tokio::test]
    async fn test_hint_is_trimmed() {
        let hint = gateway(b"  listen on 0.0.0.0  \n")
            .escalate(&request())
            .await
            .unwrap();
        assert_eq!(hint.text, "listen on 0.0.0.0");
    }

    #[tokio::test]
    async fn test_empty_line_declines() {
        let err = gateway(b"\n").escalate(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Declined { .. }));
    }

    #[tokio::test]
    async fn test_skip_and_eof_defer() {
        assert_eq!(
            gateway(b"SKIP\n").escalate(&request()).await.unwrap_err(),
            GatewayError::Deferred
        );
        assert_eq!(
            gateway(b"").escalate(&request()).await.unwrap_err(),
            GatewayError::Deferred
        );
    }
}
