//! The session manager.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::error::WalletConnectError;
use super::state::{MissingReason, ProfileStatus, SessionPhase, SessionSnapshot, WalletState};
use crate::identity::{
    AuthError, Identity, IdentityId, IdentityProviderClient, Profile, SessionSubscription,
    SubscriptionError,
};
use crate::ledger::{ChainError, LedgerClient, WalletAddress};

/// Result of resolving the identity side of a refresh.
struct Resolved {
    identity: Identity,
    profile: Option<Profile>,
    status: ProfileStatus,
    /// Bridge wallet to write back once the refresh commits.
    attribute: Option<(IdentityId, WalletAddress)>,
}

/// Process-wide session object reconciling the identity provider with the
/// wallet bridge.
///
/// All state lives in one [`SessionSnapshot`] behind a watch channel and is
/// only changed inside `send_if_modified`, so every observer sees either the
/// previous or the next consistent snapshot.
///
/// Two guards keep out-of-order completions from corrupting the snapshot:
///
/// - refreshes draw a ticket when they start and only commit if no newer
///   refresh (or sign-out) has committed meanwhile;
/// - wallet probes carry the snapshot generation they were started under and
///   are discarded once the identity has changed. Every identity change,
///   sign-out included, starts a fresh probe.
///
/// A bridge wallet adopted during a refresh is written back only after that
/// refresh commits.
pub struct SessionManager {
    identity: Arc<dyn IdentityProviderClient>,
    ledger: Arc<dyn LedgerClient>,
    state: watch::Sender<SessionSnapshot>,
    refresh_seq: AtomicU64,
    committed_refresh: AtomicU64,
    attribution: Mutex<Option<(IdentityId, WalletAddress)>>,
    probes: Mutex<JoinSet<()>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    me: Weak<Self>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("identity", &self.identity.name())
            .field("snapshot", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates an uninitialized manager.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProviderClient>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionSnapshot::initial());
        Arc::new_cyclic(|me| Self {
            identity,
            ledger,
            state,
            refresh_seq: AtomicU64::new(0),
            committed_refresh: AtomicU64::new(0),
            attribution: Mutex::new(None),
            probes: Mutex::new(JoinSet::new()),
            listener: Mutex::new(None),
            started: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// Creates a manager and runs the boot sequence.
    pub async fn start(
        identity: Arc<dyn IdentityProviderClient>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Arc<Self> {
        let manager = Self::new(identity, ledger);
        manager.init().await;
        manager
    }

    /// Boot sequence: subscribe to session changes, start a wallet probe,
    /// and resolve the identity. Returns once the identity fetch settles;
    /// the probe may still be running.
    pub async fn init(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("session manager already started");
            return;
        }
        self.state.send_modify(|s| s.phase = SessionPhase::Loading);

        let subscription = self.identity.on_session_change();
        let handle = tokio::spawn(Self::listen(self.me.clone(), subscription));
        *self.lock_listener() = Some(handle);

        let generation = self.state.borrow().generation;
        self.spawn_probe(generation);
        self.refresh().await;
        info!(provider = self.identity.name(), "session manager started");
    }

    /// Stops listening for session changes and aborts pending probes.
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
        }
        self.lock_probes().abort_all();
        debug!("session manager shut down");
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// A receiver notified on every change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Waits for in-flight wallet probes, including probes started while
    /// waiting.
    pub async fn settle(&self) {
        loop {
            // lets a pending session event spawn its probe first
            tokio::task::yield_now().await;
            let mut pending = std::mem::take(&mut *self.lock_probes());
            if pending.is_empty() {
                break;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(err) = joined {
                    debug!(error = %err, "wallet probe did not complete");
                }
            }
        }
    }

    /// Re-reads the identity and its profile.
    ///
    /// No identity (or a failed identity fetch) yields
    /// [`SessionPhase::Anonymous`]. A failed profile fetch keeps the identity
    /// and reports the profile missing.
    pub async fn refresh(&self) {
        let ticket = self.next_ticket();
        let resolved = match self.identity.current_identity().await {
            Ok(Some(identity)) => Some(self.resolve_profile(identity).await),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "identity fetch failed, treating session as anonymous");
                None
            },
        };
        match resolved {
            Some(resolved) => self.commit_authenticated(ticket, resolved).await,
            None => self.commit_anonymous(ticket),
        }
    }

    /// Prompts the wallet for account access and records the account.
    ///
    /// If the identity has no wallet yet, the address is also persisted to
    /// the identity provider; a failed write is logged and retried on a later
    /// refresh.
    pub async fn connect_wallet(&self) -> Result<WalletAddress, WalletConnectError> {
        if !self.ledger.is_bridge_available() {
            return Err(WalletConnectError::BridgeUnavailable);
        }
        self.ledger.connect().await.map_err(|err| {
            info!(error = %err, "wallet connection not granted");
            WalletConnectError::from(err)
        })?;
        let address = self
            .ledger
            .active_address()
            .await?
            .ok_or(WalletConnectError::NoAccount)?;

        let mut attribute = None;
        self.state.send_if_modified(|s| {
            let before = s.clone();
            s.wallet = WalletState::Connected(address);
            attribute = adopt_wallet(s, address);
            *s != before
        });
        info!(address = %address, "wallet connected");
        if let Some(identity_id) = attribute {
            self.persist_wallet(identity_id, address).await;
        }
        Ok(address)
    }

    async fn resolve_profile(&self, mut identity: Identity) -> Resolved {
        let (profile, status) = match self.identity.get_profile(identity.role, &identity.id).await
        {
            Ok(profile) if profile.role() == identity.role && profile.user_id() == &identity.id => {
                (Some(profile), ProfileStatus::Loaded)
            },
            Ok(profile) => {
                warn!(
                    identity_id = %identity.id,
                    role = %identity.role,
                    profile_role = %profile.role(),
                    "provider returned a profile for another identity or role"
                );
                (None, ProfileStatus::Missing(MissingReason::Unavailable))
            },
            Err(AuthError::NotFound { .. }) => {
                debug!(identity_id = %identity.id, role = %identity.role, "no profile yet");
                (None, ProfileStatus::Missing(MissingReason::NotCreated))
            },
            Err(err) => {
                warn!(identity_id = %identity.id, error = %err, "profile fetch failed");
                (None, ProfileStatus::Missing(MissingReason::Unavailable))
            },
        };

        if identity.wallet_address.is_none() {
            if let Some(address) = profile.as_ref().and_then(Profile::wallet_address) {
                debug!(identity_id = %identity.id, address = %address, "adopting profile wallet");
                identity.wallet_address = Some(*address);
            }
        }

        // a wallet seen on the bridge is attributed to an identity that has none
        let mut attribute = None;
        if identity.wallet_address.is_none() {
            let connected = self.state.borrow().wallet.address();
            if let Some(address) = connected {
                identity.wallet_address = Some(address);
                attribute = Some((identity.id.clone(), address));
            }
        }

        Resolved {
            identity,
            profile,
            status,
            attribute,
        }
    }

    async fn commit_authenticated(&self, ticket: u64, resolved: Resolved) {
        let Resolved {
            identity,
            profile,
            status,
            attribute,
        } = resolved;
        let identity_id = identity.id.clone();
        let mut committed = None;
        self.state.send_if_modified(|s| {
            if !self.claim_ticket(ticket) {
                return false;
            }
            let changed = s.identity.as_ref().map(|i| &i.id) != Some(&identity.id);
            let next = SessionSnapshot {
                phase: SessionPhase::Authenticated(status),
                identity: Some(identity),
                profile,
                wallet: s.wallet,
                generation: if changed { s.generation + 1 } else { s.generation },
            };
            committed = Some((changed, next.generation));
            if *s == next {
                return false;
            }
            *s = next;
            true
        });

        match committed {
            None => debug!(identity_id = %identity_id, ticket, "discarding superseded refresh"),
            Some((true, generation)) => {
                info!(identity_id = %identity_id, generation, ?status, "session authenticated");
                self.spawn_probe(generation);
            },
            Some((false, generation)) => {
                debug!(identity_id = %identity_id, generation, ?status, "session refreshed");
            },
        }
        if committed.is_some() {
            if let Some((identity_id, address)) = attribute {
                self.persist_wallet(identity_id, address).await;
            }
        }
    }

    fn commit_anonymous(&self, ticket: u64) {
        let mut outcome = None;
        self.state.send_if_modified(|s| {
            if !self.claim_ticket(ticket) {
                return false;
            }
            let changed = s.identity.is_some();
            let next = SessionSnapshot {
                phase: SessionPhase::Anonymous,
                identity: None,
                profile: None,
                wallet: s.wallet,
                generation: if changed { s.generation + 1 } else { s.generation },
            };
            outcome = Some((changed, next.generation));
            if *s == next {
                return false;
            }
            *s = next;
            true
        });
        match outcome {
            None => debug!(ticket, "discarding superseded sign-out"),
            Some((true, generation)) => {
                info!(generation, "session signed out");
                self.spawn_probe(generation);
            },
            Some((false, _)) => debug!("session anonymous"),
        }
    }

    fn next_ticket(&self) -> u64 {
        self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Only called under the watch lock, which serializes commits.
    fn claim_ticket(&self, ticket: u64) -> bool {
        if ticket <= self.committed_refresh.load(Ordering::SeqCst) {
            return false;
        }
        self.committed_refresh.store(ticket, Ordering::SeqCst);
        true
    }

    fn spawn_probe(&self, generation: u64) {
        if !self.ledger.is_bridge_available() {
            debug!(generation, "no wallet bridge, skipping probe");
            return;
        }
        let ledger = Arc::clone(&self.ledger);
        let me = self.me.clone();
        self.lock_probes().spawn(async move {
            let result = ledger.active_address().await;
            if let Some(manager) = me.upgrade() {
                manager.apply_probe(generation, result).await;
            }
        });
    }

    async fn apply_probe(&self, generation: u64, result: Result<Option<WalletAddress>, ChainError>) {
        let address = match result {
            Ok(Some(address)) => address,
            Ok(None) => {
                debug!(generation, "wallet probe found no authorized account");
                return;
            },
            Err(err) => {
                debug!(generation, error = %err, "wallet probe failed");
                return;
            },
        };

        let mut current = true;
        let mut attribute = None;
        self.state.send_if_modified(|s| {
            if s.generation != generation {
                current = false;
                return false;
            }
            let before = s.clone();
            s.wallet = WalletState::Connected(address);
            attribute = adopt_wallet(s, address);
            *s != before
        });

        if !current {
            debug!(generation, address = %address, "discarding stale wallet probe");
            return;
        }
        debug!(generation, address = %address, "wallet probe found account");
        if let Some(identity_id) = attribute {
            self.persist_wallet(identity_id, address).await;
        }
    }

    /// Best-effort write of a discovered wallet to the identity provider.
    /// Concurrent paths discovering the same pair write it once.
    async fn persist_wallet(&self, identity_id: IdentityId, address: WalletAddress) {
        {
            let mut claimed = self.lock_attribution();
            if claimed.as_ref() == Some(&(identity_id.clone(), address)) {
                return;
            }
            *claimed = Some((identity_id.clone(), address));
        }
        match self.identity.set_wallet_address(&identity_id, &address).await {
            Ok(()) => info!(identity_id = %identity_id, address = %address, "wallet attributed to identity"),
            Err(err) => {
                warn!(identity_id = %identity_id, address = %address, error = %err, "failed to persist wallet address");
                let mut claimed = self.lock_attribution();
                if claimed.as_ref() == Some(&(identity_id, address)) {
                    *claimed = None;
                }
            },
        }
    }

    async fn listen(me: Weak<Self>, mut subscription: SessionSubscription) {
        loop {
            let event = subscription.recv().await;
            let Some(manager) = me.upgrade() else {
                break;
            };
            match event {
                Ok(event) if event.identity.is_some() => {
                    debug!(kind = ?event.kind, "session event");
                    manager.refresh().await;
                },
                Ok(event) => {
                    debug!(kind = ?event.kind, "session ended");
                    let ticket = manager.next_ticket();
                    manager.commit_anonymous(ticket);
                },
                Err(SubscriptionError::Lagged(missed)) => {
                    warn!(missed, "session events lagged, refreshing");
                    manager.refresh().await;
                },
                Err(SubscriptionError::Closed) => {
                    debug!("session event stream closed");
                    break;
                },
            }
        }
    }

    fn lock_probes(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_attribution(&self) -> MutexGuard<'_, Option<(IdentityId, WalletAddress)>> {
        self.attribution.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
        }
    }
}

/// Records `address` on the snapshot's identity if it has none. Returns the
/// identity to persist it for.
fn adopt_wallet(snapshot: &mut SessionSnapshot, address: WalletAddress) -> Option<IdentityId> {
    let identity = snapshot.identity.as_mut()?;
    if identity.wallet_address.is_some() {
        return None;
    }
    identity.wallet_address = Some(address);
    Some(identity.id.clone())
}
