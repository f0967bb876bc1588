//! Template rendering with the vault secret helper.
//!
//! Templates see two things: `host` (the uname-derived facts of the
//! target) and `secret(path)`, which fetches a key/value map from vault.

use std::sync::Arc;

use minijinja::value::Value;
use minijinja::{context, Environment, ErrorKind};

use reconcile::{Error, HostInfo, Renderer};

use crate::secrets::VaultSecrets;

pub struct TemplateRenderer {
    secrets: Arc<VaultSecrets>,
}

impl TemplateRenderer {
    pub fn new(secrets: VaultSecrets) -> Self {
        Self {
            secrets: Arc::new(secrets),
        }
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, source: &str, host: &HostInfo) -> reconcile::Result<String> {
        let mut env = Environment::new();
        let secrets = Arc::clone(&self.secrets);
        env.add_function(
            "secret",
            move |path: String| -> Result<Value, minijinja::Error> {
                match secrets.fetch(&path) {
                    Ok(map) => Ok(Value::from_serialize(&map)),
                    Err(err) => Err(minijinja::Error::new(
                        ErrorKind::InvalidOperation,
                        format!("secret {path}: {err:#}"),
                    )),
                }
            },
        );
        env.render_str(source, context! { host => host })
            .map_err(|err| Error::Template(err.to_string()))
    }
}
