//! Wires configuration, backends and the session for one invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use healthlink_core::config::HealthlinkConfig;
use healthlink_core::content::PinataClient;
use healthlink_core::identity::SupabaseIdentityClient;
use healthlink_core::records::{HealthRecordService, WalletRequirement};
use healthlink_core::session::{SessionManager, SessionSnapshot};
use tracing::debug;

use crate::session_store;

/// Backends and session for the running command.
pub struct App {
    /// Identity provider client; also the access audit store.
    pub identity: Arc<SupabaseIdentityClient>,
    /// Role-checked actions.
    pub service: HealthRecordService,
    session_file: PathBuf,
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Loads the config file if it exists, then applies environment overrides.
pub fn load_config(path: &Path) -> Result<HealthlinkConfig> {
    let config = if path.exists() {
        HealthlinkConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        HealthlinkConfig::default()
    };
    let config = config.with_env_overrides(env_lookup)?;
    config.validate()?;
    Ok(config)
}

impl App {
    /// Builds the clients, restores any persisted session and boots the
    /// session manager.
    pub async fn open(
        config_path: &Path,
        session_file: PathBuf,
        require_wallet: bool,
    ) -> Result<Self> {
        let config = load_config(config_path)?;

        let identity = Arc::new(
            SupabaseIdentityClient::new(config.supabase_settings(env_lookup)?)
                .context("failed to create identity client")?,
        );
        if let Some(session) = session_store::load(&session_file)? {
            identity.restore_session(session);
        }
        let ledger = Arc::new(config.ledger_client()?);
        let content = Arc::new(
            PinataClient::new(config.pinata_settings(env_lookup))
                .context("failed to create content store client")?,
        );

        let session = SessionManager::start(identity.clone(), ledger.clone()).await;
        session.settle().await;

        let requirement = if require_wallet {
            WalletRequirement::Required
        } else {
            config.wallet_requirement()
        };
        let service = HealthRecordService::new(
            session,
            identity.clone(),
            ledger,
            content,
            identity.clone(),
        )
        .with_wallet_requirement(requirement);

        Ok(Self {
            identity,
            service,
            session_file,
        })
    }

    /// Current session view.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.service.session().snapshot()
    }

    /// Re-reads the session after an auth change and waits for wallet probes.
    pub async fn resync(&self) {
        self.service.session().refresh().await;
        self.service.session().settle().await;
    }

    /// Writes the provider's session to disk, or removes the file when
    /// signed out, then stops background tasks.
    pub fn close(self) -> Result<()> {
        self.service.session().shutdown();
        match self.identity.current_session() {
            Some(session) => session_store::save(&self.session_file, &session),
            None => session_store::clear(&self.session_file),
        }
    }
}
