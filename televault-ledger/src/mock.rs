//! In-memory collaborators for tests and local tooling.
//!
//! Both support forced failures and a hook that runs in the middle of the
//! external call, which is how tests simulate a collaborator calling back
//! into the vault.

use crate::collaborators::{ItemRegistry, ValueTokenLedger};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use televault_core::error::{IssueError, TransferError};
use televault_core::id::{Amount, Identity, ItemId};

/// Runs after a registry transfer has been applied
pub type TransferHook = Arc<dyn Fn(ItemId) + Send + Sync>;

/// Runs before an issuance is attempted
pub type IssueHook = Arc<dyn Fn(&Identity, Amount) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct RegistryState {
    owners: HashMap<ItemId, Identity>,

    /// Single-item approvals, cleared when the item moves
    approvals: HashMap<ItemId, Identity>,

    /// (owner, operator) pairs approved for every item of the owner
    operators: HashSet<(Identity, Identity)>,

    transfers: usize,
    failure: Option<TransferError>,
}

/// Item registry with owner/approval semantics of a non-fungible token
#[derive(Default)]
pub struct InMemoryItemRegistry {
    state: Mutex<RegistryState>,
    hook: Mutex<Option<TransferHook>>,
}

impl InMemoryItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `item_id` owned by `to`
    pub fn mint(&self, to: &Identity, item_id: ItemId) -> Result<(), TransferError> {
        if to.is_zero() {
            return Err(TransferError::ZeroRecipient);
        }
        let mut state = lock(&self.state);
        if state.owners.contains_key(&item_id) {
            return Err(TransferError::Rejected(format!("item {} already exists", item_id)));
        }
        state.owners.insert(item_id, *to);
        Ok(())
    }

    /// Let `operator` move one item of `owner`
    pub fn approve(&self, owner: &Identity, operator: &Identity, item_id: ItemId) -> Result<(), TransferError> {
        let mut state = lock(&self.state);
        match state.owners.get(&item_id) {
            None => Err(TransferError::UnknownItem(item_id)),
            Some(actual) if actual != owner => Err(TransferError::NotOwner {
                item: item_id,
                expected: *owner,
                actual: *actual,
            }),
            Some(_) => {
                state.approvals.insert(item_id, *operator);
                Ok(())
            }
        }
    }

    /// Let `operator` move every item of `owner`, now and later
    pub fn set_approval_for_all(&self, owner: &Identity, operator: &Identity, approved: bool) {
        let mut state = lock(&self.state);
        if approved {
            state.operators.insert((*owner, *operator));
        } else {
            state.operators.remove(&(*owner, *operator));
        }
    }

    /// Number of transfers applied so far
    pub fn transfer_count(&self) -> usize {
        lock(&self.state).transfers
    }

    /// Make every transfer fail with `failure` until cleared with `None`
    pub fn fail_transfers(&self, failure: Option<TransferError>) {
        lock(&self.state).failure = failure;
    }

    pub fn set_transfer_hook(&self, hook: impl Fn(ItemId) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Arc::new(hook));
    }

    pub fn clear_transfer_hook(&self) {
        *lock(&self.hook) = None;
    }
}

impl ItemRegistry for InMemoryItemRegistry {
    fn owner_of(&self, item_id: ItemId) -> Option<Identity> {
        lock(&self.state).owners.get(&item_id).copied()
    }

    fn transfer_from(
        &self,
        operator: &Identity,
        from: &Identity,
        to: &Identity,
        item_id: ItemId,
    ) -> Result<(), TransferError> {
        {
            let mut state = lock(&self.state);
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }

            let owner = *state
                .owners
                .get(&item_id)
                .ok_or(TransferError::UnknownItem(item_id))?;
            if owner != *from {
                return Err(TransferError::NotOwner {
                    item: item_id,
                    expected: *from,
                    actual: owner,
                });
            }
            if to.is_zero() {
                return Err(TransferError::ZeroRecipient);
            }

            let approved = operator == from
                || state.approvals.get(&item_id) == Some(operator)
                || state.operators.contains(&(*from, *operator));
            if !approved {
                return Err(TransferError::NotApproved {
                    operator: *operator,
                    item: item_id,
                });
            }

            state.approvals.remove(&item_id);
            state.owners.insert(item_id, *to);
            state.transfers += 1;
        }

        // The state lock is released so the hook may call back into us
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(item_id);
        }
        Ok(())
    }
}

/// How issued value reaches the recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueMode {
    /// New value is created
    Mint,

    /// Value moves out of the issuer's balance
    Treasury,
}

#[derive(Debug)]
struct TokenState {
    balances: HashMap<Identity, Amount>,
    issuances: usize,
    failure: Option<IssueError>,
}

/// Value-token ledger with minting or treasury issuance
pub struct InMemoryValueToken {
    mode: IssueMode,
    state: Mutex<TokenState>,
    hook: Mutex<Option<IssueHook>>,
}

impl InMemoryValueToken {
    pub fn new(mode: IssueMode) -> Self {
        Self {
            mode,
            state: Mutex::new(TokenState {
                balances: HashMap::new(),
                issuances: 0,
                failure: None,
            }),
            hook: Mutex::new(None),
        }
    }

    pub fn minting() -> Self {
        Self::new(IssueMode::Mint)
    }

    pub fn treasury() -> Self {
        Self::new(IssueMode::Treasury)
    }

    pub fn mode(&self) -> IssueMode {
        self.mode
    }

    /// Add `amount` to the balance of `holder`, e.g. to fund a treasury
    pub fn credit(&self, holder: &Identity, amount: Amount) -> Result<(), IssueError> {
        let mut state = lock(&self.state);
        let balance = state.balances.entry(*holder).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(IssueError::Overflow(amount))?;
        Ok(())
    }

    /// Number of successful issuances so far
    pub fn issue_count(&self) -> usize {
        lock(&self.state).issuances
    }

    /// Make every issuance fail with `failure` until cleared with `None`
    pub fn fail_issuance(&self, failure: Option<IssueError>) {
        lock(&self.state).failure = failure;
    }

    pub fn set_issue_hook(&self, hook: impl Fn(&Identity, Amount) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Arc::new(hook));
    }
}

impl ValueTokenLedger for InMemoryValueToken {
    fn balance_of(&self, holder: &Identity) -> Amount {
        lock(&self.state).balances.get(holder).copied().unwrap_or(0)
    }

    fn issue(&self, issuer: &Identity, to: &Identity, amount: Amount) -> Result<(), IssueError> {
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(to, amount);
        }

        let mut state = lock(&self.state);
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        if self.mode == IssueMode::Treasury && issuer == to {
            state.issuances += 1;
            return Ok(());
        }

        let current = state.balances.get(to).copied().unwrap_or(0);
        let credited = current.checked_add(amount).ok_or(IssueError::Overflow(amount))?;

        if self.mode == IssueMode::Treasury {
            let available = state.balances.get(issuer).copied().unwrap_or(0);
            if available < amount {
                return Err(IssueError::InsufficientBalance {
                    available,
                    requested: amount,
                });
            }
            state.balances.insert(*issuer, available - amount);
        }

        state.balances.insert(*to, credited);
        state.issuances += 1;
        Ok(())
    }
}
