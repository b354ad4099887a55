//! Invoice Storage
//!
//! The store is append/update-only: invoices are never deleted. The single
//! synchronization primitive is [`InvoiceStore::compare_and_transition`], which is
//! atomic per invoice and never locks the whole store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::StoreError;
use crate::model::{Invoice, InvoiceId, InvoiceState, PaymentReference, Transition};

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Invoice storage trait
pub trait InvoiceStore: Send + Sync {
    /// Insert a new invoice; fails with `DuplicateId` if the id is taken
    fn create(&self, invoice: Invoice) -> Result<InvoiceId>;

    /// Get invoice by id
    fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>>;

    /// Apply `transition` only if the stored state still equals `expected`.
    ///
    /// Returns the updated invoice. Fails with `StaleState` when another
    /// transition got there first; callers treat that as "already handled".
    fn compare_and_transition(
        &self,
        id: &InvoiceId,
        expected: InvoiceState,
        transition: Transition,
    ) -> Result<Invoice>;

    /// Get the invoice a payment reference was recorded against
    fn find_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Invoice>>;

    /// All invoices currently in `state`, oldest first
    fn list_by_state(&self, state: InvoiceState) -> Result<Vec<Invoice>>;
}

/// In-memory invoice store backed by sharded maps
pub struct MemoryInvoiceStore {
    invoices: DashMap<InvoiceId, Invoice>,
    by_payment_reference: DashMap<PaymentReference, InvoiceId>,
}

impl Default for MemoryInvoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self {
            invoices: DashMap::new(),
            by_payment_reference: DashMap::new(),
        }
    }

    /// Number of stored invoices
    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }

    /// Insert, running `commit` on the new record before it becomes visible
    fn insert_with<F>(&self, invoice: Invoice, commit: F) -> Result<InvoiceId>
    where
        F: FnOnce(&Invoice) -> Result<()>,
    {
        let id = invoice.id.clone();
        match self.invoices.entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                commit(&invoice)?;
                if let Some(reference) = &invoice.payment_reference {
                    self.by_payment_reference
                        .insert(reference.clone(), id.clone());
                }
                slot.insert(invoice);
                Ok(id)
            }
        }
    }

    /// Compare-and-transition, running `commit` on the updated record while the
    /// invoice's entry is still held. A failing commit leaves the record untouched.
    fn transition_with<F>(
        &self,
        id: &InvoiceId,
        expected: InvoiceState,
        transition: Transition,
        commit: F,
    ) -> Result<Invoice>
    where
        F: FnOnce(&Invoice) -> Result<()>,
    {
        let mut entry = self
            .invoices
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if entry.state != expected {
            return Err(StoreError::StaleState {
                expected,
                actual: entry.state,
            });
        }

        let reference = transition.payment_reference().cloned();
        let mut next = entry.value().clone();
        next.apply(transition)?;

        if let Some(reference) = &reference {
            match self.by_payment_reference.entry(reference.clone()) {
                Entry::Occupied(owner) => {
                    return Err(StoreError::DuplicatePaymentReference {
                        reference: reference.to_string(),
                        invoice_id: owner.get().clone(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(id.clone());
                }
            }
        }

        if let Err(e) = commit(&next) {
            if let Some(reference) = &reference {
                self.by_payment_reference.remove(reference);
            }
            return Err(e);
        }

        *entry = next.clone();
        Ok(next)
    }
}

impl InvoiceStore for MemoryInvoiceStore {
    fn create(&self, invoice: Invoice) -> Result<InvoiceId> {
        self.insert_with(invoice, |_| Ok(()))
    }

    fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        Ok(self.invoices.get(id).map(|entry| entry.value().clone()))
    }

    fn compare_and_transition(
        &self,
        id: &InvoiceId,
        expected: InvoiceState,
        transition: Transition,
    ) -> Result<Invoice> {
        self.transition_with(id, expected, transition, |_| Ok(()))
    }

    fn find_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Invoice>> {
        // Release the index guard before touching the invoice map.
        let id = match self.by_payment_reference.get(reference) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        self.get(&id)
    }

    fn list_by_state(&self, state: InvoiceState) -> Result<Vec<Invoice>> {
        let mut result: Vec<_> = self
            .invoices
            .iter()
            .filter(|entry| entry.state == state)
            .map(|entry| entry.value().clone())
            .collect();

        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }
}

/// Durable invoice store: one JSON document per invoice in a directory.
///
/// Every create and transition is written to disk before it becomes visible in
/// memory, so a recorded payment survives a crash that happens mid-delivery.
pub struct FileInvoiceStore {
    dir: PathBuf,
    index: MemoryInvoiceStore,
}

impl FileInvoiceStore {
    /// Open (or create) a store directory and load every invoice in it
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let index = MemoryInvoiceStore::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = fs::read(&path)?;
            let invoice: Invoice = serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Storage(format!("{}: {}", path.display(), e))
            })?;
            index.create(invoice)?;
        }

        tracing::info!(
            dir = %dir.display(),
            invoices = index.len(),
            "Opened invoice store"
        );

        Ok(Self { dir, index })
    }

    fn path_for(&self, id: &InvoiceId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write_snapshot(&self, invoice: &Invoice) -> Result<()> {
        let path = self.path_for(&invoice.id);
        let tmp = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(invoice)?;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        Ok(())
    }
}

/// Ids become file names, so only allow a conservative character set
fn check_file_safe(id: &InvoiceId) -> Result<()> {
    let safe = !id.as_str().is_empty()
        && id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if safe {
        Ok(())
    } else {
        Err(StoreError::Storage(format!("invoice id not storable: {id}")))
    }
}

impl InvoiceStore for FileInvoiceStore {
    fn create(&self, invoice: Invoice) -> Result<InvoiceId> {
        check_file_safe(&invoice.id)?;
        self.index
            .insert_with(invoice, |record| self.write_snapshot(record))
    }

    fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        self.index.get(id)
    }

    fn compare_and_transition(
        &self,
        id: &InvoiceId,
        expected: InvoiceState,
        transition: Transition,
    ) -> Result<Invoice> {
        self.index
            .transition_with(id, expected, transition, |record| {
                self.write_snapshot(record)
            })
    }

    fn find_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Invoice>> {
        self.index.find_by_payment_reference(reference)
    }

    fn list_by_state(&self, state: InvoiceState) -> Result<Vec<Invoice>> {
        self.index.list_by_state(state)
    }
}
