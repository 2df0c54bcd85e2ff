// src/vault.rs
use crate::csv_codec::{self, ImportBatches};
use crate::error::{VaultError, VaultResult};
use crate::models::{
    Category, Credential, CredentialDraft, Insurance, InsuranceDraft, Section, Vehicle,
    VehicleDraft,
};
use crate::remote::{self, Record, RemoteStore};
use chrono::NaiveDate;
use log;
use std::fs;
use std::path::{Path, PathBuf};

/// A CSV document ready to be written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvExport {
    pub file_name: String,
    pub content: String,
}

impl CsvExport {
    fn new(stem: &str, content: String) -> Self {
        CsvExport { file_name: format!("{}.csv", stem), content }
    }

    pub fn write_to(&self, dir: &Path) -> VaultResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        fs::write(&path, &self.content)?;
        log::info!("Exported {:?}", path);
        Ok(path)
    }
}

fn add_to<R: Record, S: RemoteStore>(store: &S, list: &mut Vec<R>, draft: &R::Draft) -> VaultResult<R> {
    let stored = remote::insert::<R, S>(store, draft)?;
    log::info!("Added {} {}", R::KIND, stored.id());
    list.insert(0, stored.clone());
    Ok(stored)
}

fn position_of<R: Record>(list: &[R], id: &str) -> VaultResult<usize> {
    list.iter()
        .position(|r| r.id() == id)
        .ok_or_else(|| VaultError::NotFound { kind: R::KIND, id: id.to_string() })
}

fn update_in<R: Record, S: RemoteStore>(store: &S, list: &mut [R], id: &str, draft: R::Draft) -> VaultResult<()> {
    let idx = position_of(list, id)?;
    remote::update::<R, S>(store, id, &draft)?;
    list[idx] = R::with_id(id.to_string(), draft);
    log::info!("Updated {} {}", R::KIND, id);
    Ok(())
}

fn delete_from<R: Record, S: RemoteStore>(store: &S, list: &mut Vec<R>, id: &str) -> VaultResult<R> {
    let idx = position_of(list, id)?;
    remote::delete::<R, S>(store, id)?;
    log::info!("Deleted {} {}", R::KIND, id);
    Ok(list.remove(idx))
}

/// Owns the three in-memory lists and keeps them in step with the remote store.
///
/// Lists change only after the remote call succeeded. The one exception is
/// [`Vault::import_csv`]: batches are inserted one after another and an error on a
/// later batch leaves the earlier ones committed.
pub struct Vault<S: RemoteStore> {
    store: S,
    credentials: Vec<Credential>,
    vehicles: Vec<Vehicle>,
    insurances: Vec<Insurance>,
}

impl<S: RemoteStore> Vault<S> {
    pub fn new(store: S) -> Self {
        Vault {
            store,
            credentials: Vec::new(),
            vehicles: Vec::new(),
            insurances: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn credentials_in(&self, category: Category) -> Vec<&Credential> {
        self.credentials.iter().filter(|c| c.category == category).collect()
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn insurances(&self) -> &[Insurance] {
        &self.insurances
    }

    /// Number of records shown in `section`.
    pub fn count(&self, section: Section) -> usize {
        match section.category() {
            Some(category) => self.credentials_in(category).len(),
            None if section == Section::Insurance => self.insurances.len(),
            None => self.vehicles.len(),
        }
    }

    /// Reloads all three lists. Nothing is replaced unless every fetch succeeds.
    pub fn load_all(&mut self, today: NaiveDate) -> VaultResult<()> {
        log::info!("Loading vault contents");
        let credentials = remote::list::<Credential, S>(&self.store)?;
        let vehicles = remote::list::<Vehicle, S>(&self.store)?;
        let mut insurances = remote::list::<Insurance, S>(&self.store)?;
        for policy in &mut insurances {
            policy.reset_paid_if_past_due(today);
        }
        log::info!(
            "Loaded {} credentials, {} vehicles, {} insurances",
            credentials.len(),
            vehicles.len(),
            insurances.len()
        );
        self.credentials = credentials;
        self.vehicles = vehicles;
        self.insurances = insurances;
        Ok(())
    }

    /// Drops the in-memory lists, used when the vault is locked again.
    pub fn clear(&mut self) {
        self.credentials.clear();
        self.vehicles.clear();
        self.insurances.clear();
    }

    pub fn add_credential(&mut self, draft: &CredentialDraft) -> VaultResult<Credential> {
        add_to(&self.store, &mut self.credentials, draft)
    }

    pub fn add_vehicle(&mut self, draft: &VehicleDraft) -> VaultResult<Vehicle> {
        add_to(&self.store, &mut self.vehicles, draft)
    }

    pub fn add_insurance(&mut self, draft: &InsuranceDraft) -> VaultResult<Insurance> {
        add_to(&self.store, &mut self.insurances, draft)
    }

    pub fn update_credential(&mut self, id: &str, draft: CredentialDraft) -> VaultResult<()> {
        update_in(&self.store, &mut self.credentials, id, draft)
    }

    pub fn update_vehicle(&mut self, id: &str, draft: VehicleDraft) -> VaultResult<()> {
        update_in(&self.store, &mut self.vehicles, id, draft)
    }

    pub fn update_insurance(&mut self, id: &str, draft: InsuranceDraft) -> VaultResult<()> {
        update_in(&self.store, &mut self.insurances, id, draft)
    }

    pub fn delete_credential(&mut self, id: &str) -> VaultResult<Credential> {
        delete_from(&self.store, &mut self.credentials, id)
    }

    pub fn delete_vehicle(&mut self, id: &str) -> VaultResult<Vehicle> {
        delete_from(&self.store, &mut self.vehicles, id)
    }

    pub fn delete_insurance(&mut self, id: &str) -> VaultResult<Insurance> {
        delete_from(&self.store, &mut self.insurances, id)
    }

    /// Flips the paid flag of one policy and returns the new value.
    pub fn toggle_paid(&mut self, id: &str) -> VaultResult<bool> {
        let idx = position_of(&self.insurances, id)?;
        let mut draft = self.insurances[idx].to_draft();
        draft.is_paid = !draft.is_paid;
        let new_status = draft.is_paid;
        update_in(&self.store, &mut self.insurances, id, draft)?;
        Ok(new_status)
    }

    /// Decodes `text`, inserts each non-empty batch in turn, then reloads everything.
    pub fn import_csv(&mut self, text: &str, today: NaiveDate) -> VaultResult<ImportBatches> {
        let batches = csv_codec::decode_batches(text)?;
        if !batches.credentials.is_empty() {
            remote::insert_batch::<Credential, S>(&self.store, &batches.credentials)?;
        }
        if !batches.vehicles.is_empty() {
            remote::insert_batch::<Vehicle, S>(&self.store, &batches.vehicles)?;
        }
        if !batches.insurances.is_empty() {
            remote::insert_batch::<Insurance, S>(&self.store, &batches.insurances)?;
        }
        self.load_all(today)?;
        Ok(batches)
    }

    pub fn import_file(&mut self, path: &Path, today: NaiveDate) -> VaultResult<ImportBatches> {
        log::info!("Importing CSV from {:?}", path);
        let text = fs::read_to_string(path)?;
        self.import_csv(&text, today)
    }

    /// CSV of the records shown in `section`, `None` when the section is empty.
    pub fn export_section(&self, section: Section) -> Option<CsvExport> {
        let content = match section.category() {
            Some(category) => {
                let records: Vec<Credential> = self.credentials_in(category).into_iter().cloned().collect();
                csv_codec::export(&records)
            }
            None if section == Section::Insurance => csv_codec::export(&self.insurances),
            None => csv_codec::export(&self.vehicles),
        }?;
        Some(CsvExport::new(section.export_name(), content))
    }

    pub fn export_all(&self) -> Option<CsvExport> {
        let content = csv_codec::export_complete(&self.credentials, &self.vehicles, &self.insurances)?;
        Some(CsvExport::new("passvault_complete_export", content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::VehicleType;
    use crate::remote::memory::{Call, MemoryStore};
    use crate::remote::{CREDENTIALS_TABLE, INSURANCES_TABLE, VEHICLES_TABLE};
    use serde_json::json;
    use tempfile::tempdir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn seeded_vault() -> Vault<MemoryStore> {
        let store = MemoryStore::new();
        store.seed(CREDENTIALS_TABLE, json!({"service": "Facebook", "username": "john", "password": "pw1", "category": "social"}));
        store.seed(CREDENTIALS_TABLE, json!({"service": "Chase Bank", "username": "j_doe", "password": "pw2", "category": "personal"}));
        store.seed(VEHICLES_TABLE, json!({"name": "City Commuter", "type": "Car", "last_service": "2023-10-20", "next_service": "2024-10-20"}));
        store.seed(INSURANCES_TABLE, json!({"name": "Old Policy", "due_date": "2024-01-01", "premium": "$50/mo", "comments": "", "is_paid": true}));
        store.seed(INSURANCES_TABLE, json!({"name": "Future Policy", "due_date": "2024-12-01", "premium": "$20/mo", "comments": "", "is_paid": true}));
        let mut vault = Vault::new(store);
        vault.load_all(today()).unwrap();
        vault
    }

    #[test]
    fn test_load_orders_newest_first_and_filters_categories() {
        let vault = seeded_vault();
        assert_eq!(vault.credentials()[0].service, "Chase Bank");
        assert_eq!(vault.credentials_in(Category::Social).len(), 1);
        assert_eq!(vault.count(Section::Personal), 1);
        assert_eq!(vault.count(Section::Miscellaneous), 1);
        assert_eq!(vault.count(Section::Insurance), 2);
    }

    #[test]
    fn test_past_due_policies_load_unpaid_without_write_back() {
        let vault = seeded_vault();
        let old = vault.insurances().iter().find(|p| p.name == "Old Policy").unwrap();
        let future = vault.insurances().iter().find(|p| p.name == "Future Policy").unwrap();
        assert!(!old.is_paid);
        assert!(future.is_paid);

        let stored = vault.store().rows(INSURANCES_TABLE);
        assert_eq!(stored[0]["is_paid"], json!(true));
        assert_eq!(vault.store().count(|c| matches!(c, Call::Update(..))), 0);
    }

    #[test]
    fn test_failed_load_keeps_previous_lists() {
        let mut vault = seeded_vault();
        vault.store().fail_selects(true);
        let err = vault.load_all(today()).unwrap_err();
        assert_eq!(err.to_string(), "service unavailable");
        assert_eq!(vault.credentials().len(), 2);
    }

    #[test]
    fn test_delete_removes_one_entry_and_issues_one_call() {
        let mut vault = seeded_vault();
        let id = vault.vehicles()[0].id.clone();
        let removed = vault.delete_vehicle(&id).unwrap();
        assert_eq!(removed.name, "City Commuter");
        assert!(vault.vehicles().is_empty());
        assert_eq!(
            vault.store().count(|c| matches!(c, Call::Delete(..))),
            1
        );
        assert!(vault.store().rows(VEHICLES_TABLE).is_empty());
    }

    #[test]
    fn test_delete_unknown_id_makes_no_remote_call() {
        let mut vault = seeded_vault();
        let result = vault.delete_credential("does-not-exist");
        assert!(matches!(result, Err(VaultError::NotFound { kind: "credential", .. })));
        assert_eq!(vault.store().count(|c| matches!(c, Call::Delete(..))), 0);
    }

    #[test]
    fn test_failed_delete_keeps_local_entry() {
        let mut vault = seeded_vault();
        vault.store().fail_writes_on(CREDENTIALS_TABLE, "permission denied for table passwords");
        let id = vault.credentials()[0].id.clone();
        let err = vault.delete_credential(&id).unwrap_err();
        assert_eq!(err.to_string(), "permission denied for table passwords");
        assert_eq!(vault.credentials().len(), 2);
    }

    #[test]
    fn test_add_prepends_stored_record() {
        let mut vault = seeded_vault();
        let added = vault
            .add_vehicle(&VehicleDraft {
                name: "Mountain Explorer".into(),
                vehicle_type: VehicleType::Bike,
                last_service: "2024-01-15".into(),
                next_service: "2024-04-15".into(),
            })
            .unwrap();
        assert!(!added.id.is_empty());
        assert_eq!(vault.vehicles()[0], added);
        let stored = vault.store().rows(VEHICLES_TABLE);
        assert_eq!(stored.last().unwrap()["last_service"], json!("2024-01-15"));
    }

    #[test]
    fn test_update_overwrites_all_fields() {
        let mut vault = seeded_vault();
        let original = vault.credentials_in(Category::Social)[0].clone();
        let mut draft = original.to_draft();
        draft.password = "rotated".into();
        draft.category = Category::Personal;
        vault.update_credential(&original.id, draft).unwrap();

        assert_eq!(vault.credentials_in(Category::Personal).len(), 2);
        let stored = vault.store().rows(CREDENTIALS_TABLE);
        let row = stored.iter().find(|r| r["id"] == json!(original.id)).unwrap();
        assert_eq!(row["password"], json!("rotated"));
        assert_eq!(row["category"], json!("personal"));
    }

    #[test]
    fn test_toggle_paid_twice_ends_on_last_value() {
        let mut vault = seeded_vault();
        let id = vault.insurances().iter().find(|p| p.name == "Future Policy").unwrap().id.clone();
        assert!(!vault.toggle_paid(&id).unwrap());
        assert!(vault.toggle_paid(&id).unwrap());

        let local = vault.insurances().iter().find(|p| p.id == id).unwrap();
        assert!(local.is_paid);
        let stored = vault.store().rows(INSURANCES_TABLE);
        let row = stored.iter().find(|r| r["id"] == json!(id)).unwrap();
        assert_eq!(row["is_paid"], json!(true));
    }

    #[test]
    fn test_import_inserts_batches_then_reloads() {
        let mut vault = Vault::new(MemoryStore::new());
        let text = "name,due_date,premium,comments,is_paid\n\"Car Insurance\",\"2024-01-01\",\"$50/mo\",\"none\",\"false\"";
        let batches = vault.import_csv(text, today()).unwrap();
        assert_eq!(batches.insurances.len(), 1);

        let policy = &vault.insurances()[0];
        assert_eq!(policy.due_date, "2024-01-01");
        assert!(!policy.is_paid);
        assert_eq!(vault.store().count(|c| matches!(c, Call::Insert(..))), 1);
        assert_eq!(vault.store().count(|c| matches!(c, Call::Select(..))), 3);
    }

    #[test]
    fn test_import_failure_leaves_earlier_batches_committed() {
        let mut vault = Vault::new(MemoryStore::new());
        vault.store().fail_writes_on(VEHICLES_TABLE, "violates check constraint");
        let text = "service,password,name,last_service\nGmail,pw,,\n,,Sedan,2024-01-01";
        let err = vault.import_csv(text, today()).unwrap_err();
        assert!(matches!(err, VaultError::Store(StoreError::Remote { .. })));

        assert_eq!(vault.store().rows(CREDENTIALS_TABLE).len(), 1);
        assert!(vault.credentials().is_empty(), "no reload after a failed batch");
    }

    #[test]
    fn test_export_section_and_reimport_round_trip() {
        let vault = seeded_vault();
        let export = vault.export_section(Section::Social).unwrap();
        assert_eq!(export.file_name, "social_passwords.csv");

        let mut fresh = Vault::new(MemoryStore::new());
        fresh.import_csv(&export.content, today()).unwrap();
        assert_eq!(
            fresh.credentials()[0].to_draft(),
            vault.credentials_in(Category::Social)[0].to_draft()
        );
    }

    #[test]
    fn test_export_empty_section_is_none() {
        let vault = Vault::new(MemoryStore::new());
        assert_eq!(vault.export_section(Section::Insurance), None);
        assert_eq!(vault.export_all(), None);
    }

    #[test]
    fn test_export_all_writes_file() {
        let vault = seeded_vault();
        let dir = tempdir().unwrap();
        let path = vault.export_all().unwrap().write_to(dir.path()).unwrap();
        assert!(path.ends_with("passvault_complete_export.csv"));
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 1 + 2 + 1 + 2);
    }

    #[test]
    fn test_import_file_missing_is_io_error() {
        let mut vault = Vault::new(MemoryStore::new());
        let dir = tempdir().unwrap();
        let result = vault.import_file(&dir.path().join("nope.csv"), today());
        assert!(matches!(result, Err(VaultError::Io(_))));
    }
}
