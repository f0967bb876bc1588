//! Secret fetching through the run's transport.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use reconcile::{CancelToken, Cmd, Host};

/// `vault kv get -format json` response (the v2 kv engine nests data twice).
#[derive(Debug, Deserialize)]
struct VaultResponse {
    data: VaultData,
}

#[derive(Debug, Deserialize)]
struct VaultData {
    data: HashMap<String, String>,
}

/// Fetches secrets by shelling out to `vault` on the run's real transport —
/// the local machine, or the SSH target when one is given. The dry shadow
/// is deliberately bypassed: a `kv get` mutates nothing, and rendering
/// needs the actual values.
pub struct VaultSecrets {
    transport: Arc<dyn Host>,
    cancel: CancelToken,
}

impl VaultSecrets {
    pub fn new(transport: Arc<dyn Host>, cancel: CancelToken) -> Self {
        Self { transport, cancel }
    }

    pub fn fetch(&self, path: &str) -> Result<HashMap<String, String>> {
        let cmd = Cmd::new("vault")
            .arg("kv")
            .arg("get")
            .arg("-format")
            .arg("json")
            .arg(format!("secret/{path}"))
            .cancel(self.cancel.clone());
        let out = self
            .transport
            .exec(&cmd)
            .with_context(|| format!("vault fetch of secret/{path} failed"))?;
        let response: VaultResponse =
            serde_json::from_slice(&out.stdout).context("vault returned unexpected JSON")?;
        Ok(response.data.data)
    }
}
