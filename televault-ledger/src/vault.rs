//! The custody ledger.
//!
//! A [`Vault`] takes items into custody against dual-signed authorizations,
//! issues value tokens for them, and returns them to their depositors.
//!
//! Operations and queries on one vault run one at a time. Callers on other
//! threads wait for the call in flight; a collaborator calling back into the
//! vault during a call is refused with [`VaultError::ReentrantCall`]. Local
//! state changes are committed as one [`WriteBatch`] and undone with its
//! inverse when a later external step fails.

use crate::collaborators::{CollaboratorDirectory, ItemRegistry, ValueTokenLedger};
use crate::error::VaultError;
use crate::events::EventSink;
use log::{debug, error, info, warn};
use std::sync::Arc;
use televault_core::clock::{Clock, SystemClock};
use televault_core::config::VaultSettings;
use televault_core::error::{InputError, StorageError};
use televault_core::guard::{EntryGuard, ReentrancyGuard};
use televault_core::id::{Identity, ItemId, Nonce};
use televault_core::objects::{CustodyRecord, ReleasePolicy, VaultConfig, VaultPolicy};
use televault_core::request::{
    PawnReceipt, PawnRequest, RecoveryReceipt, ReleaseReceipt, ReleaseRequest, VaultEvent,
};
use televault_core::validator::AuthorizationValidator;
use televault_storage::{VaultStore, WriteBatch};

/// A held item whose registry owner is not the custodian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustodyDivergence {
    pub item_id: ItemId,
    pub depositor: Identity,

    /// Owner reported by the registry, `None` if the item no longer exists
    pub registry_owner: Option<Identity>,
}

pub struct Vault {
    /// Identity that holds items in custody and issues value
    custodian: Identity,
    store: Box<dyn VaultStore>,
    directory: Arc<dyn CollaboratorDirectory>,
    clock: Arc<dyn Clock>,
    policy: VaultPolicy,
    guard: ReentrancyGuard,
    events: Option<Arc<dyn EventSink>>,
}

impl Vault {
    /// Open a vault over `store`.
    ///
    /// `initial` is persisted only when the store holds no configuration yet;
    /// otherwise the persisted configuration wins.
    pub fn new(
        custodian: Identity,
        initial: VaultConfig,
        store: Box<dyn VaultStore>,
        directory: Arc<dyn CollaboratorDirectory>,
    ) -> Result<Self, VaultError> {
        if custodian.is_zero() {
            return Err(VaultError::InvalidConfiguration(
                "custodian must not be the zero identity".to_string(),
            ));
        }

        match store.config()? {
            Some(config) => debug!(
                "opening vault {} with persisted configuration (administrator {})",
                custodian, config.administrator
            ),
            None => {
                if initial.administrator.is_zero() {
                    return Err(VaultError::InvalidConfiguration(
                        "administrator must be set".to_string(),
                    ));
                }
                store.commit(&WriteBatch::new().set_config(initial))?;
                info!(
                    "initialized vault {} with administrator {}",
                    custodian, initial.administrator
                );
            }
        }

        Ok(Self {
            custodian,
            store,
            directory,
            clock: Arc::new(SystemClock),
            policy: VaultPolicy::default(),
            guard: ReentrancyGuard::new(),
            events: None,
        })
    }

    /// Open a vault as described by deployment settings
    pub fn from_settings(
        settings: &VaultSettings,
        store: Box<dyn VaultStore>,
        directory: Arc<dyn CollaboratorDirectory>,
    ) -> Result<Self, VaultError> {
        Ok(Self::new(settings.custodian(), settings.config, store, directory)?
            .with_policy(settings.policy))
    }

    pub fn with_policy(mut self, policy: VaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn custodian(&self) -> Identity {
        self.custodian
    }

    pub fn policy(&self) -> VaultPolicy {
        self.policy
    }

    /// Move an item into custody and issue its value to `submitter`.
    ///
    /// The submitter must have approved the custodian on the item registry
    /// beforehand. On success the submitter's nonce has advanced by one.
    pub fn pawn(&self, request: &PawnRequest, submitter: &Identity) -> Result<PawnReceipt, VaultError> {
        let _entry = self.enter()?;
        request.check_input()?;

        let config = self.complete_config()?;
        let nonce = self.store.nonce(submitter)?;
        if let Err(err) = self.validator(&config).validate_pawn(request, submitter, nonce) {
            debug!("rejected pawn of item {} by {}: {}", request.item_id, submitter, err);
            return Err(err.into());
        }

        let next_nonce = nonce.checked_add(1).ok_or_else(|| {
            StorageError::Corrupted(format!("nonce of {} is exhausted", submitter))
        })?;
        let registry = self.item_registry(&config)?;
        let token = self.value_token(&config)?;

        registry.transfer_from(&self.custodian, submitter, &self.custodian, request.item_id)?;

        let batch = WriteBatch::new()
            .set_nonce(*submitter, next_nonce)
            .set_custody(CustodyRecord::held_by_custodian(request.item_id, *submitter));
        let inverse = match self.store.apply(&batch) {
            Ok(inverse) => inverse,
            Err(err) => {
                return Err(self.undo_pawn(&*registry, request.item_id, submitter, None, err.into()))
            }
        };

        if let Err(err) = token.issue(&self.custodian, submitter, request.value_amount) {
            return Err(self.undo_pawn(
                &*registry,
                request.item_id,
                submitter,
                Some(&inverse),
                err.into(),
            ));
        }

        let receipt = PawnReceipt {
            item_id: request.item_id,
            holder: *submitter,
            value_amount: request.value_amount,
            nonce: next_nonce,
        };
        info!(
            "pawned item {} from {} for {} (nonce now {})",
            receipt.item_id, receipt.holder, receipt.value_amount, receipt.nonce
        );
        self.emit(VaultEvent::Pawned(receipt));
        Ok(receipt)
    }

    /// Return a held item to its depositor without a release authorization
    pub fn release(&self, item_id: ItemId, caller: &Identity) -> Result<ReleaseReceipt, VaultError> {
        self.release_with(&ReleaseRequest::unsigned(item_id), caller)
    }

    /// Return a held item to its depositor, subject to the release policy
    pub fn release_with(
        &self,
        request: &ReleaseRequest,
        caller: &Identity,
    ) -> Result<ReleaseReceipt, VaultError> {
        let _entry = self.enter()?;
        let item_id = request.item_id;
        if !item_id.is_valid() {
            return Err(InputError::InvalidItemId.into());
        }

        let config = self.stored_config()?;
        let record = self.held_record(item_id)?.ok_or(VaultError::NotInCustody(item_id))?;

        match self.policy.release {
            ReleasePolicy::Unrestricted => {
                warn!(
                    "releasing item {} to {} on behalf of {} under the unrestricted release policy",
                    item_id, record.depositor, caller
                );
            }
            ReleasePolicy::DepositorOrAdministrator => {
                Self::check_releaser(caller, &record, &config)?;
            }
            ReleasePolicy::DualSignature => {
                Self::check_releaser(caller, &record, &config)?;
                let authorization = request
                    .authorization
                    .ok_or(VaultError::AuthorizationRequired(item_id))?;
                let nonce = self.store.nonce(&record.depositor)?;
                if let Err(err) = self.validator(&config).validate_release(
                    item_id,
                    &authorization,
                    &record.depositor,
                    nonce,
                ) {
                    debug!("rejected release of item {} by {}: {}", item_id, caller, err);
                    return Err(err.into());
                }
            }
        }

        let registry = self.item_registry(&config)?;
        let inverse = self
            .store
            .apply(&WriteBatch::new().set_custody(record.released()))?;
        if let Err(err) =
            registry.transfer_from(&self.custodian, &self.custodian, &record.depositor, item_id)
        {
            return Err(self.revert(&inverse, err.into()));
        }

        let receipt = ReleaseReceipt {
            item_id,
            depositor: record.depositor,
            caller: *caller,
        };
        info!(
            "released item {} to {} (requested by {})",
            item_id, record.depositor, caller
        );
        self.emit(VaultEvent::Released(receipt));
        Ok(receipt)
    }

    /// Administrator escape hatch: move an item the custodian holds to
    /// `destination`, bypassing the release policy.
    ///
    /// Works for items sent to the custodian without a pawn as well.
    pub fn emergency_recover(
        &self,
        item_id: ItemId,
        destination: &Identity,
        caller: &Identity,
    ) -> Result<RecoveryReceipt, VaultError> {
        let _entry = self.enter()?;
        let config = self.stored_config()?;
        Self::require_administrator(caller, &config, "recover items")?;

        if !item_id.is_valid() {
            return Err(InputError::InvalidItemId.into());
        }
        if destination.is_zero() {
            return Err(InputError::InvalidDestination.into());
        }

        let registry = self.item_registry(&config)?;
        let record = self.held_record(item_id)?;
        if record.is_none() && registry.owner_of(item_id) != Some(self.custodian) {
            return Err(VaultError::NotInCustody(item_id));
        }

        // Untracked items have no local state to change
        let inverse = match record {
            Some(record) => Some(
                self.store
                    .apply(&WriteBatch::new().set_custody(record.released()))?,
            ),
            None => None,
        };
        if let Err(err) =
            registry.transfer_from(&self.custodian, &self.custodian, destination, item_id)
        {
            return Err(match inverse {
                Some(inverse) => self.revert(&inverse, err.into()),
                None => err.into(),
            });
        }

        let receipt = RecoveryReceipt {
            item_id,
            destination: *destination,
            depositor: record.map(|record| record.depositor),
        };
        match receipt.depositor {
            Some(depositor) => warn!(
                "emergency recovery: item {} deposited by {} moved to {} by administrator {}",
                item_id, depositor, destination, caller
            ),
            None => warn!(
                "emergency recovery: untracked item {} moved to {} by administrator {}",
                item_id, destination, caller
            ),
        }
        self.emit(VaultEvent::EmergencyRecovered(receipt));
        Ok(receipt)
    }

    /// Re-point the vault at new collaborators and a new backend signer.
    ///
    /// Custody records do not remember the registry they were made under.
    /// Items held when the item registry changes can only be released or
    /// recovered through the new registry; [`Vault::audit_custody`] reports
    /// them until the registry is pointed back.
    pub fn update_configuration(
        &self,
        item_registry: Identity,
        value_token: Identity,
        backend: Identity,
        caller: &Identity,
    ) -> Result<VaultConfig, VaultError> {
        let _entry = self.enter()?;
        let config = self.stored_config()?;
        Self::require_administrator(caller, &config, "update the configuration")?;

        for (name, address) in [
            ("item_registry", item_registry),
            ("value_token", value_token),
            ("backend", backend),
        ] {
            if address.is_zero() {
                return Err(VaultError::InvalidConfiguration(format!(
                    "{} must not be the zero identity",
                    name
                )));
            }
        }

        if item_registry != config.item_registry {
            let held = self.store.snapshot()?.custody.values().filter(|r| r.held).count();
            if held > 0 {
                warn!(
                    "item registry moves from {} to {} with {} items in custody",
                    config.item_registry, item_registry, held
                );
            }
        }

        let updated = VaultConfig {
            item_registry,
            value_token,
            backend,
            administrator: config.administrator,
        };
        self.store.commit(&WriteBatch::new().set_config(updated))?;

        info!(
            "configuration updated: item registry {}, value token {}, backend {}",
            item_registry, value_token, backend
        );
        self.emit(VaultEvent::ConfigurationUpdated {
            item_registry,
            value_token,
            backend,
        });
        Ok(updated)
    }

    /// Hand the administrator capability to another identity
    pub fn transfer_administration(
        &self,
        administrator: Identity,
        caller: &Identity,
    ) -> Result<VaultConfig, VaultError> {
        let _entry = self.enter()?;
        let config = self.stored_config()?;
        Self::require_administrator(caller, &config, "transfer administration")?;

        if administrator.is_zero() {
            return Err(VaultError::InvalidConfiguration(
                "administrator must not be the zero identity".to_string(),
            ));
        }

        let updated = VaultConfig {
            administrator,
            ..config
        };
        self.store.commit(&WriteBatch::new().set_config(updated))?;

        info!(
            "administration transferred from {} to {}",
            config.administrator, administrator
        );
        self.emit(VaultEvent::AdministrationTransferred {
            previous: config.administrator,
            administrator,
        });
        Ok(updated)
    }

    /// Nonce the next authorization of `holder` must be signed over
    pub fn nonce_of(&self, holder: &Identity) -> Result<Nonce, VaultError> {
        let _entry = self.enter()?;
        Ok(self.store.nonce(holder)?)
    }

    pub fn custody_of(&self, item_id: ItemId) -> Result<Option<CustodyRecord>, VaultError> {
        let _entry = self.enter()?;
        Ok(self.store.custody(&item_id)?)
    }

    pub fn configuration(&self) -> Result<VaultConfig, VaultError> {
        let _entry = self.enter()?;
        self.stored_config()
    }

    /// BLAKE3 commitment to the persisted vault state
    pub fn state_root(&self) -> Result<[u8; 32], VaultError> {
        let _entry = self.enter()?;
        Ok(self.store.state_root()?)
    }

    /// Compare every held item against the registry and report the items the
    /// custodian does not actually own
    pub fn audit_custody(&self) -> Result<Vec<CustodyDivergence>, VaultError> {
        let _entry = self.enter()?;
        let config = self.stored_config()?;
        let registry = self.item_registry(&config)?;
        let snapshot = self.store.snapshot()?;

        let mut divergent = Vec::new();
        for record in snapshot.custody.values().filter(|record| record.held) {
            let owner = registry.owner_of(record.item_id);
            if owner != Some(self.custodian) {
                warn!(
                    "custody divergence: item {} deposited by {} is owned by {:?} in the registry",
                    record.item_id, record.depositor, owner
                );
                divergent.push(CustodyDivergence {
                    item_id: record.item_id,
                    depositor: record.depositor,
                    registry_owner: owner,
                });
            }
        }
        debug!(
            "custody audit of {} finished with {} divergent items",
            self.custodian,
            divergent.len()
        );
        Ok(divergent)
    }

    fn enter(&self) -> Result<EntryGuard<'_>, VaultError> {
        self.guard.enter().ok_or(VaultError::ReentrantCall)
    }

    fn stored_config(&self) -> Result<VaultConfig, VaultError> {
        self.store
            .config()?
            .ok_or(VaultError::NotConfigured("administrator"))
    }

    fn complete_config(&self) -> Result<VaultConfig, VaultError> {
        let config = self.stored_config()?;
        match config.missing_field() {
            Some(field) => Err(VaultError::NotConfigured(field)),
            None => Ok(config),
        }
    }

    fn held_record(&self, item_id: ItemId) -> Result<Option<CustodyRecord>, VaultError> {
        Ok(self.store.custody(&item_id)?.filter(|record| record.held))
    }

    fn validator(&self, config: &VaultConfig) -> AuthorizationValidator {
        AuthorizationValidator::new(config.backend)
            .at(self.clock.now())
            .require_deadline(self.policy.require_deadline)
    }

    fn item_registry(&self, config: &VaultConfig) -> Result<Arc<dyn ItemRegistry>, VaultError> {
        if config.item_registry.is_zero() {
            return Err(VaultError::NotConfigured("item_registry"));
        }
        self.directory
            .item_registry(&config.item_registry)
            .ok_or(VaultError::UnknownCollaborator(config.item_registry))
    }

    fn value_token(&self, config: &VaultConfig) -> Result<Arc<dyn ValueTokenLedger>, VaultError> {
        if config.value_token.is_zero() {
            return Err(VaultError::NotConfigured("value_token"));
        }
        self.directory
            .value_token(&config.value_token)
            .ok_or(VaultError::UnknownCollaborator(config.value_token))
    }

    fn require_administrator(
        caller: &Identity,
        config: &VaultConfig,
        action: &'static str,
    ) -> Result<(), VaultError> {
        if *caller != config.administrator {
            return Err(VaultError::Unauthorized {
                caller: *caller,
                action,
            });
        }
        Ok(())
    }

    fn check_releaser(
        caller: &Identity,
        record: &CustodyRecord,
        config: &VaultConfig,
    ) -> Result<(), VaultError> {
        if *caller != record.depositor && *caller != config.administrator {
            return Err(VaultError::Unauthorized {
                caller: *caller,
                action: "release this item",
            });
        }
        Ok(())
    }

    /// Undo the local commit and hand the item back after a failed pawn
    fn undo_pawn(
        &self,
        registry: &dyn ItemRegistry,
        item_id: ItemId,
        submitter: &Identity,
        inverse: Option<&WriteBatch>,
        cause: VaultError,
    ) -> VaultError {
        let mut failures = Vec::new();
        if let Some(inverse) = inverse {
            if let Err(err) = self.store.commit(inverse) {
                failures.push(format!("local state: {}", err));
            }
        }
        if let Err(err) = registry.transfer_from(&self.custodian, &self.custodian, submitter, item_id) {
            failures.push(format!("item return: {}", err));
        }
        self.compensated(cause, failures)
    }

    /// Undo a local commit after the external step that followed it failed
    fn revert(&self, inverse: &WriteBatch, cause: VaultError) -> VaultError {
        let failures = match self.store.commit(inverse) {
            Ok(()) => Vec::new(),
            Err(err) => vec![format!("local state: {}", err)],
        };
        self.compensated(cause, failures)
    }

    fn compensated(&self, cause: VaultError, failures: Vec<String>) -> VaultError {
        if failures.is_empty() {
            debug!("rolled back after failure: {}", cause);
            return cause;
        }
        let detail = failures.join("; ");
        error!("rollback after \"{}\" failed: {}", cause, detail);
        VaultError::RollbackFailed {
            cause: Box::new(cause),
            detail,
        }
    }

    fn emit(&self, event: VaultEvent) {
        if let Some(sink) = &self.events {
            sink.emit(&event);
        }
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("custodian", &self.custodian)
            .field("policy", &self.policy)
            .field("entered", &self.guard.is_entered())
            .finish()
    }
}
