//! Re-entrancy and rollback tests.
//!
//! The payout rails here call back into the vault from inside the transfer,
//! the way a hostile recipient would, and record what they observed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;

use biogate_contracts::{
    BiometricVault, InMemoryRail, LedgerError, PayoutRail, ReentrancyError, ReleaseRequest,
    TransferError, VaultError, VaultEvent,
};
use biogate_protocol::{AccountId, Clock, GateConfig, ManualClock};
use chrono::Duration;

fn acct(s: &str) -> AccountId {
    AccountId::new(s)
}

/// What a re-entrant callback saw and got back.
#[derive(Debug, Default)]
struct Observation {
    owner_balance: Option<u64>,
    completed_flag: Option<bool>,
    in_progress: Option<bool>,
    reentry: Option<String>,
}

/// Re-enters `withdraw` for `attacker` before forwarding the payout.
struct WithdrawAgainRail {
    attacker: AccountId,
    inner: InMemoryRail,
    seen: Mutex<Observation>,
}

impl PayoutRail for WithdrawAgainRail {
    fn transfer(
        &self,
        vault: &BiometricVault,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError> {
        {
            let mut seen = self.seen.lock();
            seen.owner_balance = Some(vault.balance_of(&self.attacker));
            seen.in_progress = Some(vault.is_transfer_in_progress());
            seen.reentry = vault
                .withdraw(&self.attacker, amount)
                .err()
                .map(|e| e.to_string());
        }
        self.inner.transfer(vault, recipient, amount)
    }
}

/// Re-enters `complete` for the same transaction before forwarding.
struct CompleteAgainRail {
    admin: AccountId,
    owner: AccountId,
    tx_id: String,
    inner: InMemoryRail,
    seen: Mutex<Observation>,
    reentry_error: Mutex<Option<VaultError>>,
}

impl PayoutRail for CompleteAgainRail {
    fn transfer(
        &self,
        vault: &BiometricVault,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError> {
        {
            let mut seen = self.seen.lock();
            seen.owner_balance = Some(vault.balance_of(&self.owner));
            seen.completed_flag = Some(vault.transaction(&self.tx_id).completed);
            let result = vault.complete(&self.admin, &self.tx_id, recipient);
            seen.reentry = result.as_ref().err().map(|e| e.to_string());
            *self.reentry_error.lock() = result.err();
        }
        self.inner.transfer(vault, recipient, amount)
    }
}

fn vault_with(rail: Arc<dyn PayoutRail>) -> (BiometricVault, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let vault = BiometricVault::with_clock(GateConfig::with_admin("admin"), rail, clock.clone());
    (vault, clock)
}

/// Registers `owner` as `u1`, deposits `balance` and opens a verified
/// release `t1` of `amount`.
fn verified_release(
    vault: &BiometricVault,
    clock: &ManualClock,
    owner: &AccountId,
    balance: u64,
    amount: u64,
) {
    vault.register(owner, "u1").unwrap();
    vault.deposit(owner, balance).unwrap();
    vault
        .initiate(
            &acct("admin"),
            ReleaseRequest::new("t1", "u1", amount, "s", clock.now() + Duration::hours(1)),
        )
        .unwrap();
    vault.verify(owner, "t1", "u1", b"s").unwrap();
}

/// Runs `reenter` from inside the payout, recording `watch`'s balance at
/// that moment, then forwards the payout.
struct ReenterRail<F> {
    watch: AccountId,
    reenter: F,
    inner: InMemoryRail,
    seen_balance: Mutex<Option<u64>>,
    reentry_error: Mutex<Option<VaultError>>,
}

impl<F> ReenterRail<F> {
    fn new(watch: AccountId, reenter: F) -> Self {
        Self {
            watch,
            reenter,
            inner: InMemoryRail::new(),
            seen_balance: Mutex::new(None),
            reentry_error: Mutex::new(None),
        }
    }
}

impl<F> PayoutRail for ReenterRail<F>
where
    F: Fn(&BiometricVault) -> Result<(), VaultError> + Send + Sync,
{
    fn transfer(
        &self,
        vault: &BiometricVault,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError> {
        *self.seen_balance.lock() = Some(vault.balance_of(&self.watch));
        *self.reentry_error.lock() = (self.reenter)(vault).err();
        self.inner.transfer(vault, recipient, amount)
    }
}

/// Deposits `deposit` into `owner` from inside the payout, then fails it.
struct DepositThenFailRail {
    owner: AccountId,
    deposit: u64,
    deposit_result: Mutex<Option<Result<u64, VaultError>>>,
}

impl PayoutRail for DepositThenFailRail {
    fn transfer(
        &self,
        vault: &BiometricVault,
        _recipient: &AccountId,
        _amount: u64,
    ) -> Result<(), TransferError> {
        *self.deposit_result.lock() = Some(vault.deposit(&self.owner, self.deposit));
        Err(TransferError::Unavailable("down".into()))
    }
}

/// Holds every payout for `delay` and tracks how many overlap.
struct SlowRail {
    delay: StdDuration,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    inner: InMemoryRail,
}

impl PayoutRail for SlowRail {
    fn transfer(
        &self,
        vault: &BiometricVault,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), TransferError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(entered) = self.entered.lock().take() {
            let _ = entered.send(());
        }
        thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.transfer(vault, recipient, amount)
    }
}

#[test]
fn reentrant_withdraw_is_rejected() {
    let attacker = acct("attacker");
    let rail = Arc::new(WithdrawAgainRail {
        attacker: attacker.clone(),
        inner: InMemoryRail::new(),
        seen: Mutex::new(Observation::default()),
    });
    let (vault, _) = vault_with(rail.clone());

    vault.deposit(&attacker, 100).unwrap();
    vault.withdraw(&attacker, 60).unwrap();

    let seen = rail.seen.lock();
    assert_eq!(seen.owner_balance, Some(40), "callback must see the debit");
    assert_eq!(seen.in_progress, Some(true));
    assert!(seen.reentry.as_deref().unwrap().contains("re-entrant"));

    // Exactly one payout.
    assert_eq!(rail.inner.received(&attacker), 60);
    assert_eq!(vault.balance_of(&attacker), 40);
    assert!(!vault.is_transfer_in_progress());
}

#[test]
fn reentrant_withdraw_even_within_balance_is_rejected() {
    // 10 left after the first debit would cover a second 10, but the guard
    // rejects it regardless of balance.
    let attacker = acct("attacker");
    let rail = Arc::new(WithdrawAgainRail {
        attacker: attacker.clone(),
        inner: InMemoryRail::new(),
        seen: Mutex::new(Observation::default()),
    });
    let (vault, _) = vault_with(rail.clone());

    vault.deposit(&attacker, 20).unwrap();
    vault.withdraw(&attacker, 10).unwrap();

    assert!(rail.seen.lock().reentry.is_some());
    assert_eq!(rail.inner.received(&attacker), 10);
    assert_eq!(vault.balance_of(&attacker), 10);
}

#[test]
fn reentrant_complete_is_rejected() {
    let owner = acct("owner");
    let recipient = acct("merchant");
    let rail = Arc::new(CompleteAgainRail {
        admin: acct("admin"),
        owner: owner.clone(),
        tx_id: "t1".into(),
        inner: InMemoryRail::new(),
        seen: Mutex::new(Observation::default()),
        reentry_error: Mutex::new(None),
    });
    let (vault, clock) = vault_with(rail.clone());

    vault.register(&owner, "u1").unwrap();
    vault.deposit(&owner, 1_000).unwrap();
    vault
        .initiate(
            &acct("admin"),
            ReleaseRequest::new("t1", "u1", 400, "s", clock.now() + Duration::hours(1)),
        )
        .unwrap();
    vault.verify(&owner, "t1", "u1", b"s").unwrap();
    vault.complete(&acct("admin"), "t1", &recipient).unwrap();

    {
        let seen = rail.seen.lock();
        assert_eq!(seen.owner_balance, Some(600));
        assert_eq!(seen.completed_flag, Some(true));
    }
    assert!(matches!(
        rail.reentry_error.lock().take(),
        Some(VaultError::Reentrancy(ReentrancyError::Locked))
    ));

    assert_eq!(rail.inner.received(&recipient), 400);
    assert_eq!(vault.user_balance("u1"), 600);
    let completions = vault
        .events()
        .iter()
        .filter(|e| matches!(e.event, VaultEvent::TransactionCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn failed_payout_rolls_back_completion() {
    let rail = Arc::new(InMemoryRail::new());
    let (vault, clock) = vault_with(rail.clone());
    let owner = acct("owner");
    let admin = acct("admin");

    vault.register(&owner, "u1").unwrap();
    vault.deposit(&owner, 500).unwrap();
    vault
        .initiate(
            &admin,
            ReleaseRequest::new("t1", "u1", 200, "s", clock.now() + Duration::hours(1)),
        )
        .unwrap();
    vault.verify(&owner, "t1", "u1", b"s").unwrap();
    let before = vault.transaction("t1");
    let events_before = vault.events().len();

    rail.reject_transfers_to("blocked");
    assert!(matches!(
        vault.complete(&admin, "t1", &acct("blocked")),
        Err(VaultError::TransferFailed(TransferError::Rejected(_)))
    ));

    assert_eq!(vault.transaction("t1"), before);
    assert_eq!(vault.user_balance("u1"), 500);
    assert_eq!(vault.events().len(), events_before);
    assert!(!vault.is_transfer_in_progress());

    // The release is still completable to a working recipient.
    vault.complete(&admin, "t1", &acct("ok")).unwrap();
    assert_eq!(rail.received(&acct("ok")), 200);
    assert_eq!(vault.user_balance("u1"), 300);
}

#[test]
fn guard_is_released_after_every_failure() {
    let rail = Arc::new(InMemoryRail::new());
    let (vault, _) = vault_with(rail.clone());
    let owner = acct("owner");

    assert!(vault.withdraw(&owner, 10).is_err());
    assert!(!vault.is_transfer_in_progress());

    assert!(vault.complete(&acct("admin"), "missing", &owner).is_err());
    assert!(!vault.is_transfer_in_progress());

    vault.deposit(&owner, 10).unwrap();
    vault.withdraw(&owner, 10).unwrap();
    assert_eq!(rail.received(&owner), 10);
}

#[test]
fn owner_withdraw_inside_complete_payout_is_rejected() {
    let owner = acct("owner");
    let merchant = acct("merchant");
    let reentering_owner = owner.clone();
    let rail = Arc::new(ReenterRail::new(owner.clone(), move |vault: &BiometricVault| {
        vault.withdraw(&reentering_owner, 100)
    }));
    let (vault, clock) = vault_with(rail.clone());
    verified_release(&vault, &clock, &owner, 1_000, 400);

    vault.complete(&acct("admin"), "t1", &merchant).unwrap();

    assert_eq!(*rail.seen_balance.lock(), Some(600));
    assert!(matches!(
        rail.reentry_error.lock().take(),
        Some(VaultError::Reentrancy(ReentrancyError::Locked))
    ));
    assert_eq!(rail.inner.received(&merchant), 400);
    assert_eq!(rail.inner.received(&owner), 0);
    assert_eq!(rail.inner.total_paid(), 400);
    assert_eq!(vault.user_balance("u1"), 600);
    assert!(vault.transaction("t1").completed);
}

#[test]
fn complete_inside_withdraw_payout_is_rejected() {
    let owner = acct("owner");
    let merchant = acct("merchant");
    let reentering_merchant = merchant.clone();
    let rail = Arc::new(ReenterRail::new(owner.clone(), move |vault: &BiometricVault| {
        vault.complete(&acct("admin"), "t1", &reentering_merchant)
    }));
    let (vault, clock) = vault_with(rail.clone());
    verified_release(&vault, &clock, &owner, 1_000, 400);

    vault.withdraw(&owner, 100).unwrap();

    assert_eq!(*rail.seen_balance.lock(), Some(900));
    assert!(matches!(
        rail.reentry_error.lock().take(),
        Some(VaultError::Reentrancy(ReentrancyError::Locked))
    ));
    assert_eq!(rail.inner.received(&owner), 100);
    assert_eq!(rail.inner.total_paid(), 100);
    assert_eq!(vault.user_balance("u1"), 900);

    let release = vault.transaction("t1");
    assert!(release.verified);
    assert!(!release.completed);

    // Once the withdrawal is done the release goes through normally.
    vault.complete(&acct("admin"), "t1", &merchant).unwrap();
    assert_eq!(vault.user_balance("u1"), 500);
    assert_eq!(rail.inner.received(&merchant), 400);
}

#[test]
fn deposit_during_failed_payout_cannot_lose_the_rollback() {
    let owner = acct("owner");
    let rail = Arc::new(DepositThenFailRail {
        owner: owner.clone(),
        deposit: u64::MAX - 600,
        deposit_result: Mutex::new(None),
    });
    let (vault, clock) = vault_with(rail.clone());
    verified_release(&vault, &clock, &owner, 1_000, 400);
    let before = vault.transaction("t1");

    assert!(matches!(
        vault.complete(&acct("admin"), "t1", &acct("merchant")),
        Err(VaultError::TransferFailed(TransferError::Unavailable(_)))
    ));

    // The 400 in flight still counts against the owner's headroom.
    assert!(matches!(
        rail.deposit_result.lock().take(),
        Some(Err(VaultError::Ledger(LedgerError::Overflow { .. })))
    ));
    assert_eq!(vault.user_balance("u1"), 1_000);
    assert_eq!(vault.total_balance(), 1_000);
    assert_eq!(vault.transaction("t1"), before);
    assert!(!vault.is_transfer_in_progress());
}

#[test]
fn deposit_during_failed_payout_is_kept_alongside_the_rollback() {
    let owner = acct("owner");
    let rail = Arc::new(DepositThenFailRail {
        owner: owner.clone(),
        deposit: 50,
        deposit_result: Mutex::new(None),
    });
    let (vault, clock) = vault_with(rail.clone());
    verified_release(&vault, &clock, &owner, 1_000, 400);

    assert!(vault.complete(&acct("admin"), "t1", &acct("merchant")).is_err());

    assert!(matches!(rail.deposit_result.lock().take(), Some(Ok(650))));
    assert_eq!(vault.user_balance("u1"), 1_050);
    assert_eq!(vault.total_balance(), 1_050);
    assert!(!vault.transaction("t1").completed);
}

#[test]
fn withdrawals_from_other_threads_wait_instead_of_failing() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let rail = Arc::new(SlowRail {
        delay: StdDuration::from_millis(200),
        entered: Mutex::new(Some(entered_tx)),
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
        inner: InMemoryRail::new(),
    });
    let (vault, _) = vault_with(rail.clone());
    let alice = acct("alice");
    let bob = acct("bob");
    vault.deposit(&alice, 100).unwrap();
    vault.deposit(&bob, 100).unwrap();

    let (first, second) = thread::scope(|s| {
        let first = s.spawn(|| vault.withdraw(&alice, 60));
        entered_rx.recv().unwrap();
        assert!(vault.is_transfer_in_progress());
        let second = s.spawn(|| vault.withdraw(&bob, 70));
        (first.join().unwrap(), second.join().unwrap())
    });

    assert!(first.is_ok());
    assert!(second.is_ok(), "second withdrawal failed: {:?}", second);
    assert_eq!(rail.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(rail.inner.received(&alice), 60);
    assert_eq!(rail.inner.received(&bob), 70);
    assert_eq!(vault.balance_of(&alice), 40);
    assert_eq!(vault.balance_of(&bob), 30);
    assert!(!vault.is_transfer_in_progress());
}
