//! TLS certificate issuance adapter.
//!
//! Drives certbot through the host executor. Certificates are named after
//! the primary domain and cover the ordered-unique set of the domain plus
//! its aliases. `--expand` makes repeat issuance idempotent: an existing
//! certificate grows to cover new aliases instead of erroring.

use std::sync::Arc;

use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};
use crate::exec::HostExecutor;

/// Issues and expands TLS certificates for a domain and its aliases.
pub struct CertAdapter {
    executor: Arc<dyn HostExecutor>,
    /// Contact address registered with the certificate authority.
    contact_email: Option<String>,
}

impl CertAdapter {
    pub fn new(executor: Arc<dyn HostExecutor>, contact_email: Option<String>) -> Self {
        Self {
            executor,
            contact_email,
        }
    }

    /// The ordered-unique certificate domain set: primary first, then
    /// aliases, duplicates dropped.
    pub fn domain_set(domain: &str, aliases: &[String]) -> Vec<String> {
        let mut set = vec![domain.to_string()];
        for alias in aliases {
            if !set.contains(alias) {
                set.push(alias.clone());
            }
        }
        set
    }

    /// Issue (or expand) the certificate covering `domain` and `aliases`.
    ///
    /// A missing contact address is a configuration error, not a runtime
    /// one: issuance is never attempted without it.
    pub async fn issue(&self, domain: &str, aliases: &[String]) -> ProvisionResult<()> {
        let email = self.contact_email.as_deref().ok_or_else(|| {
            ProvisionError::Config("certificate issuer contact address is not set".to_string())
        })?;

        let domains = Self::domain_set(domain, aliases);
        let mut args = vec![
            "--nginx".to_string(),
            "--cert-name".to_string(),
            domain.to_string(),
        ];
        for d in &domains {
            args.push("-d".to_string());
            args.push(d.clone());
        }
        args.extend([
            "--non-interactive".to_string(),
            "--agree-tos".to_string(),
            "--expand".to_string(),
            "-m".to_string(),
            email.to_string(),
        ]);

        self.executor.run("certbot", &args).await?;
        info!(%domain, covered = domains.len(), "certificate issued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::exec::BoxFuture;

    struct FakeExecutor {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl HostExecutor for FakeExecutor {
        fn run<'a>(
            &'a self,
            program: &'a str,
            args: &'a [String],
        ) -> BoxFuture<'a, ProvisionResult<String>> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            self.calls.lock().unwrap().push(call);
            Box::pin(async { Ok(String::new()) })
        }
    }

    #[test]
    fn domain_set_dedupes_preserving_order() {
        let set = CertAdapter::domain_set(
            "test.dev",
            &[
                "www.test.dev".to_string(),
                "test.dev".to_string(),
                "www.test.dev".to_string(),
            ],
        );
        assert_eq!(set, vec!["test.dev", "www.test.dev"]);
    }

    #[tokio::test]
    async fn issue_requires_contact_email() {
        let adapter = CertAdapter::new(FakeExecutor::new(), None);
        let err = adapter.issue("test.dev", &[]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));
    }

    #[tokio::test]
    async fn issue_builds_non_interactive_expand_command() {
        let exec = FakeExecutor::new();
        let adapter = CertAdapter::new(exec.clone(), Some("ops@test.dev".to_string()));
        adapter
            .issue("test.dev", &["www.test.dev".to_string()])
            .await
            .unwrap();

        let calls = exec.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call[0], "certbot");
        let joined = call.join(" ");
        assert!(joined.contains("--cert-name test.dev"));
        assert!(joined.contains("-d test.dev"));
        assert!(joined.contains("-d www.test.dev"));
        assert!(joined.contains("--non-interactive"));
        assert!(joined.contains("--agree-tos"));
        assert!(joined.contains("--expand"));
        assert!(joined.contains("-m ops@test.dev"));
    }
}
