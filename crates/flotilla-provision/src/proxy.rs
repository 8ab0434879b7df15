//! Reverse-proxy configuration adapter.
//!
//! Renders a per-domain nginx server block from a template (an external
//! override path takes precedence over the built-in default), writes it into
//! the proxy's config directory, validates the resulting global config, and
//! reloads the proxy through the host executor.
//!
//! Template placeholders: `{{DOMAIN}}`, `{{ALIASES}}` (space-joined),
//! `{{UPSTREAM_HOST}}`, `{{UPSTREAM_PORT}}`. Any failure here — bad
//! upstream syntax, config validation, reload — is fatal to the
//! provisioning call; there is no partial retry.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};
use crate::exec::HostExecutor;

/// Built-in server block used when no template override is configured.
const DEFAULT_TEMPLATE: &str = r#"server {
    listen 80;
    listen [::]:80;
    server_name {{DOMAIN}} {{ALIASES}};

    location / {
        proxy_pass http://{{UPSTREAM_HOST}}:{{UPSTREAM_PORT}};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_read_timeout 300s;
    }
}
"#;

/// Renders and activates reverse-proxy configuration for a domain.
pub struct ProxyAdapter {
    executor: Arc<dyn HostExecutor>,
    /// Directory the proxy loads per-domain config files from.
    config_dir: PathBuf,
    /// Optional template override path; wins over the built-in default.
    template_path: Option<PathBuf>,
}

impl ProxyAdapter {
    pub fn new(
        executor: Arc<dyn HostExecutor>,
        config_dir: PathBuf,
        template_path: Option<PathBuf>,
    ) -> Self {
        Self {
            executor,
            config_dir,
            template_path,
        }
    }

    /// Load the template: override file if configured, else the default.
    async fn load_template(&self) -> ProvisionResult<String> {
        match &self.template_path {
            Some(path) => {
                let template = tokio::fs::read_to_string(path).await.map_err(|e| {
                    ProvisionError::Config(format!(
                        "proxy template {} unreadable: {e}",
                        path.display()
                    ))
                })?;
                Ok(template)
            }
            None => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }

    /// Substitute all placeholders in a template.
    ///
    /// The upstream pair is validated here: host must be plausible hostname
    /// or address syntax, port must be in `[1, 65535]`.
    pub fn render(
        template: &str,
        domain: &str,
        aliases: &[String],
        upstream_host: &str,
        upstream_port: u32,
    ) -> ProvisionResult<String> {
        if upstream_host.is_empty()
            || !upstream_host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(ProvisionError::validation(
                "upstream_host",
                format!("'{upstream_host}' is not a valid host"),
            ));
        }
        if upstream_port == 0 || upstream_port > 65535 {
            return Err(ProvisionError::validation(
                "upstream_port",
                format!("{upstream_port} is out of range [1, 65535]"),
            ));
        }

        let rendered = template
            .replace("{{DOMAIN}}", domain)
            .replace("{{ALIASES}}", &aliases.join(" "))
            .replace("{{UPSTREAM_HOST}}", upstream_host)
            .replace("{{UPSTREAM_PORT}}", &upstream_port.to_string());

        if rendered.contains("{{") {
            return Err(ProvisionError::Config(
                "proxy template contains unresolved placeholders".to_string(),
            ));
        }
        Ok(rendered)
    }

    /// Render and activate the config for a domain: write the file, validate
    /// the global proxy configuration, reload the proxy.
    pub async fn install(
        &self,
        domain: &str,
        aliases: &[String],
        upstream_host: &str,
        upstream_port: u32,
    ) -> ProvisionResult<PathBuf> {
        let template = self.load_template().await?;
        let rendered = Self::render(&template, domain, aliases, upstream_host, upstream_port)?;

        let config_path = self.config_dir.join(format!("{domain}.conf"));
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::write(&config_path, rendered).await?;
        debug!(path = %config_path.display(), "proxy config written");

        // Validate the whole config before reloading; a broken file must
        // never be activated.
        self.executor.run("nginx", &["-t".to_string()]).await?;
        self.executor
            .run("nginx", &["-s".to_string(), "reload".to_string()])
            .await?;

        info!(%domain, upstream = %format!("{upstream_host}:{upstream_port}"), "proxy route active");
        Ok(config_path)
    }

    /// Remove the config for a domain and reload. Missing files are fine.
    pub async fn remove(&self, domain: &str) -> ProvisionResult<()> {
        let config_path = self.config_dir.join(format!("{domain}.conf"));
        match tokio::fs::remove_file(&config_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.executor
            .run("nginx", &["-s".to_string(), "reload".to_string()])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::exec::BoxFuture;

    /// Records invocations and always succeeds.
    struct FakeExecutor {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
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
    fn render_fills_every_placeholder() {
        let rendered =
            ProxyAdapter::render(DEFAULT_TEMPLATE, "api.test.dev", &[], "127.0.0.1", 4000).unwrap();
        assert!(!rendered.contains("{{"));
        assert!(rendered.contains("server_name api.test.dev ;"));
        assert!(rendered.contains("proxy_pass http://127.0.0.1:4000;"));
    }

    #[test]
    fn render_joins_aliases_with_spaces() {
        let aliases = vec!["www.test.dev".to_string(), "alt.test.dev".to_string()];
        let rendered =
            ProxyAdapter::render(DEFAULT_TEMPLATE, "test.dev", &aliases, "10.0.0.2", 8080).unwrap();
        assert!(rendered.contains("server_name test.dev www.test.dev alt.test.dev;"));
    }

    #[test]
    fn render_rejects_port_zero() {
        let err = ProxyAdapter::render(DEFAULT_TEMPLATE, "test.dev", &[], "10.0.0.2", 0).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation { .. }));
    }

    #[test]
    fn render_rejects_port_out_of_range() {
        assert!(ProxyAdapter::render(DEFAULT_TEMPLATE, "test.dev", &[], "10.0.0.2", 70000).is_err());
    }

    #[test]
    fn render_rejects_bad_upstream_host() {
        assert!(ProxyAdapter::render(DEFAULT_TEMPLATE, "test.dev", &[], "host;evil", 80).is_err());
        assert!(ProxyAdapter::render(DEFAULT_TEMPLATE, "test.dev", &[], "", 80).is_err());
    }

    #[test]
    fn render_flags_unresolved_placeholders() {
        let err = ProxyAdapter::render("{{DOMAIN}} {{MYSTERY}}", "test.dev", &[], "h1.example.com", 80)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));
    }

    #[tokio::test]
    async fn install_writes_config_then_validates_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let exec = FakeExecutor::new();
        let adapter = ProxyAdapter::new(exec.clone(), dir.path().to_path_buf(), None);

        let path = adapter
            .install("api.test.dev", &[], "127.0.0.1", 4000)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("api.test.dev.conf"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("api.test.dev"));

        let calls = exec.calls();
        assert_eq!(calls[0], vec!["nginx", "-t"]);
        assert_eq!(calls[1], vec!["nginx", "-s", "reload"]);
    }

    #[tokio::test]
    async fn install_prefers_template_override() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("custom.conf.tmpl");
        std::fs::write(&template_path, "# custom {{DOMAIN}} {{ALIASES}} {{UPSTREAM_HOST}} {{UPSTREAM_PORT}}\n").unwrap();

        let adapter = ProxyAdapter::new(
            FakeExecutor::new(),
            dir.path().join("conf.d"),
            Some(template_path),
        );
        let path = adapter
            .install("test.dev", &[], "127.0.0.1", 3000)
            .await
            .unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.starts_with("# custom test.dev"));
    }

    #[tokio::test]
    async fn remove_tolerates_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let exec = FakeExecutor::new();
        let adapter = ProxyAdapter::new(exec.clone(), dir.path().to_path_buf(), None);
        adapter.remove("never-installed.dev").await.unwrap();
        // No reload when there was nothing to remove.
        assert!(exec.calls().is_empty());
    }
}
