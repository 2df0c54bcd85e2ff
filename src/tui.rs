// src/tui.rs
use crate::config::Config;
use crate::error::{AppResult, TuiError, VaultError};
use crate::generator::{self, SecretCriteria};
use crate::lock::LockGate;
use crate::models::{
    parse_date, CredentialDraft, DueStatus, InsuranceDraft, Section, VehicleDraft, VehicleType,
};
use crate::notify::{Notifier, Variant};
use crate::remote::{RemoteStore, SupabaseStore};
use crate::vault::Vault;

use arboard; // For clipboard
use chrono::{Local, NaiveDate};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Clear, Gauge, List, ListItem, Paragraph, Row, Table, TableState, Wrap},
};
use std::io::{stdout, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use log;

const VEHICLE_TYPES: &[&str] = &["Car", "Bike"];
const PAID_CHOICES: &[&str] = &["No", "Yes"];
const MASK: &str = "••••••••••••";

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FieldKind {
    Text,
    Secret,
    Date,
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone)]
struct FormField {
    label: &'static str,
    value: String,
    kind: FieldKind,
}

impl FormField {
    fn new(label: &'static str, value: impl Into<String>, kind: FieldKind) -> Self {
        FormField { label, value: value.into(), kind }
    }
}

/// Add/edit modal state for one record of the current section.
#[derive(Debug, Clone)]
struct RecordForm {
    section: Section,
    editing_id: Option<String>,
    fields: Vec<FormField>,
    focus: usize,
}

impl RecordForm {
    fn blank(section: Section) -> Self {
        match section {
            Section::Social | Section::Personal => Self::credential(section, None, &CredentialDraft::default()),
            Section::Miscellaneous => Self::vehicle(None, &VehicleDraft::default()),
            Section::Insurance => Self::insurance(None, &InsuranceDraft::default()),
        }
    }

    fn credential(section: Section, editing_id: Option<String>, draft: &CredentialDraft) -> Self {
        RecordForm {
            section,
            editing_id,
            fields: vec![
                FormField::new("Service", draft.service.as_str(), FieldKind::Text),
                FormField::new("Username / Email", draft.username.as_str(), FieldKind::Text),
                FormField::new("Password (Ctrl+G generates)", draft.password.as_str(), FieldKind::Secret),
            ],
            focus: 0,
        }
    }

    fn vehicle(editing_id: Option<String>, draft: &VehicleDraft) -> Self {
        RecordForm {
            section: Section::Miscellaneous,
            editing_id,
            fields: vec![
                FormField::new("Name", draft.name.as_str(), FieldKind::Text),
                FormField::new("Type", draft.vehicle_type.as_str(), FieldKind::Choice(VEHICLE_TYPES)),
                FormField::new("Last Service (YYYY-MM-DD)", draft.last_service.as_str(), FieldKind::Date),
                FormField::new("Next Service (YYYY-MM-DD)", draft.next_service.as_str(), FieldKind::Date),
            ],
            focus: 0,
        }
    }

    fn insurance(editing_id: Option<String>, draft: &InsuranceDraft) -> Self {
        RecordForm {
            section: Section::Insurance,
            editing_id,
            fields: vec![
                FormField::new("Name", draft.name.as_str(), FieldKind::Text),
                FormField::new("Due Date (YYYY-MM-DD)", draft.due_date.as_str(), FieldKind::Date),
                FormField::new("Premium", draft.premium.as_str(), FieldKind::Text),
                FormField::new("Comments", draft.comments.as_str(), FieldKind::Text),
                FormField::new("Paid", PAID_CHOICES[usize::from(draft.is_paid)], FieldKind::Choice(PAID_CHOICES)),
            ],
            focus: 0,
        }
    }

    fn title(&self) -> String {
        let noun = match self.section {
            Section::Social | Section::Personal => "Password Entry",
            Section::Miscellaneous => "Vehicle",
            Section::Insurance => "Insurance Policy",
        };
        if self.editing_id.is_some() {
            format!("Edit {}", noun)
        } else {
            format!("Add {} to {}", noun, self.section.title())
        }
    }

    fn value(&self, idx: usize) -> String {
        match self.fields[idx].kind {
            FieldKind::Secret => self.fields[idx].value.clone(),
            _ => self.fields[idx].value.trim().to_string(),
        }
    }

    fn next_field(&mut self) {
        self.focus = (self.focus + 1) % self.fields.len();
    }

    fn previous_field(&mut self) {
        self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
    }

    fn cycle_choice(&mut self, forward: bool) {
        let field = &mut self.fields[self.focus];
        if let FieldKind::Choice(options) = field.kind {
            let current = options.iter().position(|o| *o == field.value).unwrap_or(0);
            let next = if forward {
                (current + 1) % options.len()
            } else {
                (current + options.len() - 1) % options.len()
            };
            field.value = options[next].to_string();
        }
    }

    fn type_char(&mut self, c: char) {
        match self.fields[self.focus].kind {
            FieldKind::Choice(_) => {
                if c == ' ' {
                    self.cycle_choice(true);
                }
            }
            _ => self.fields[self.focus].value.push(c),
        }
    }

    fn backspace(&mut self) {
        let field = &mut self.fields[self.focus];
        if !matches!(field.kind, FieldKind::Choice(_)) {
            field.value.pop();
        }
    }

    fn fill_generated_secret(&mut self) -> Result<(), String> {
        let Some(idx) = self.fields.iter().position(|f| f.kind == FieldKind::Secret) else {
            return Err("This form has no password field.".to_string());
        };
        self.fields[idx].value = generator::generate_secret(&SecretCriteria::default())?;
        self.focus = idx;
        Ok(())
    }

    /// Returns the label of the first field that is missing or malformed.
    fn validate(&self) -> Result<(), String> {
        let required: &[usize] = match self.section {
            Section::Social | Section::Personal => &[0, 2],
            Section::Miscellaneous => &[0, 2, 3],
            Section::Insurance => &[0, 1],
        };
        for &idx in required {
            if self.value(idx).is_empty() {
                return Err(format!("{} cannot be empty.", self.fields[idx].label));
            }
        }
        for (idx, field) in self.fields.iter().enumerate() {
            if field.kind == FieldKind::Date && !self.value(idx).is_empty() && parse_date(&self.value(idx)).is_none() {
                return Err(format!("{} is not a valid date.", field.label));
            }
        }
        Ok(())
    }

    fn credential_draft(&self) -> CredentialDraft {
        CredentialDraft {
            service: self.value(0),
            username: self.value(1),
            password: self.value(2),
            category: self.section.category().unwrap_or_default(),
        }
    }

    fn vehicle_draft(&self) -> VehicleDraft {
        VehicleDraft {
            name: self.value(0),
            vehicle_type: VehicleType::parse_lenient(&self.value(1)),
            last_service: self.value(2),
            next_service: self.value(3),
        }
    }

    fn insurance_draft(&self) -> InsuranceDraft {
        InsuranceDraft {
            name: self.value(0),
            due_date: self.value(1),
            premium: self.value(2),
            comments: self.value(3),
            is_paid: self.value(4) == "Yes",
        }
    }
}

#[derive(Debug, Clone)]
enum InputMode {
    Normal,
    Form(RecordForm),
    Import { path: String },
}

/// Remote work queued by a key press. The loop draws the loading indicator before running it.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Load,
    Submit,
    Delete(String),
    TogglePaid(String),
    Import(PathBuf),
}

pub struct App<S: RemoteStore> {
    should_quit: bool,
    gate: LockGate,
    pin_input: String,
    vault: Vault<S>,
    notifier: Notifier,
    section: Section,
    table_state: TableState,
    input_mode: InputMode,
    pending: Option<Action>,
    show_secret: bool,
    app_status: String,
    export_dir: PathBuf,
    clipboard_clear_after: Duration,
    clipboard_copied_at: Option<Instant>,
}

impl<S: RemoteStore> App<S> {
    pub fn new(vault: Vault<S>, config: &Config) -> Self {
        App {
            should_quit: false,
            gate: LockGate::new(config.unlock_pin.clone()),
            pin_input: String::new(),
            vault,
            notifier: Notifier::new(
                config.notifications.capacity,
                Duration::from_secs(config.notifications.ttl_seconds),
            ),
            section: Section::default(),
            table_state: TableState::default(),
            input_mode: InputMode::Normal,
            pending: None,
            show_secret: false,
            app_status: "Enter PIN to unlock.".to_string(),
            export_dir: config.export_dir.clone(),
            clipboard_clear_after: Duration::from_secs(config.clipboard_clear_time_seconds),
            clipboard_copied_at: None,
        }
    }

    fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    fn visible_ids(&self) -> Vec<String> {
        match self.section.category() {
            Some(category) => self.vault.credentials_in(category).iter().map(|c| c.id.clone()).collect(),
            None if self.section == Section::Insurance => self.vault.insurances().iter().map(|p| p.id.clone()).collect(),
            None => self.vault.vehicles().iter().map(|v| v.id.clone()).collect(),
        }
    }

    fn selected_id(&self) -> Option<String> {
        let idx = self.table_state.selected()?;
        self.visible_ids().get(idx).cloned()
    }

    /// Keeps the selection inside the visible rows after the lists changed.
    fn clamp_selection(&mut self) {
        let len = self.visible_ids().len();
        let selected = match (len, self.table_state.selected()) {
            (0, _) => None,
            (_, None) => Some(0),
            (len, Some(idx)) => Some(idx.min(len - 1)),
        };
        self.table_state.select(selected);
    }

    fn move_selection(&mut self, delta: i32) {
        let len = self.visible_ids().len();
        if len == 0 {
            self.table_state.select(None);
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as i32;
        let new_index = (current + delta).clamp(0, len as i32 - 1);
        self.table_state.select(Some(new_index as usize));
    }

    fn switch_section(&mut self, section: Section) {
        if self.section != section {
            log::debug!("Switching to section {:?}", section);
            self.section = section;
            self.show_secret = false;
            self.table_state.select(None);
            self.clamp_selection();
        }
    }

    fn copy_to_clipboard(&mut self, content: String, field_name: &str) {
        match arboard::Clipboard::new() {
            Ok(mut clipboard) => match clipboard.set_text(content) {
                Ok(_) => {
                    self.app_status = format!(
                        "{} copied to clipboard (cleared in {}s).",
                        field_name,
                        self.clipboard_clear_after.as_secs()
                    );
                    self.clipboard_copied_at = Some(Instant::now());
                    log::info!("Copied {} to clipboard.", field_name);
                }
                Err(err) => {
                    self.app_status = format!("Error copying {}: {}", field_name, err);
                    log::error!("Error setting clipboard text for {}: {}", field_name, err);
                }
            },
            Err(err) => {
                self.app_status = format!("Error initializing clipboard: {}", err);
                log::error!("Error initializing clipboard: {}", err);
            }
        }
    }

    /// Housekeeping run once per loop iteration.
    pub fn tick(&mut self, now: Instant) {
        self.notifier.expire(now);
        if let Some(copied_at) = self.clipboard_copied_at {
            if now.duration_since(copied_at) >= self.clipboard_clear_after {
                self.clipboard_copied_at = None;
                match arboard::Clipboard::new().and_then(|mut c| c.clear()) {
                    Ok(()) => log::info!("Clipboard cleared."),
                    Err(err) => log::warn!("Failed to clear clipboard: {}", err),
                }
            }
        }
    }

    fn lock(&mut self) {
        self.gate.lock();
        self.vault.clear();
        self.input_mode = InputMode::Normal;
        self.show_secret = false;
        self.table_state.select(None);
        self.app_status = "Vault locked. Enter PIN to unlock.".to_string();
    }

    pub fn on_key(&mut self, key_event: KeyEvent) {
        if key_event.code == KeyCode::Char('c') && key_event.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }
        if self.is_loading() {
            return;
        }
        if self.gate.is_locked() {
            self.on_lock_key(key_event);
            return;
        }

        match std::mem::replace(&mut self.input_mode, InputMode::Normal) {
            InputMode::Normal => {
                // Only command keys reach here; PIN and form input are never logged.
                log::debug!("Key event received: {:?}", key_event.code);
                self.on_normal_key(key_event)
            }
            InputMode::Form(form) => self.on_form_key(form, key_event),
            InputMode::Import { path } => self.on_import_key(path, key_event),
        }
    }

    fn on_lock_key(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Char(c) => self.pin_input.push(c),
            KeyCode::Backspace => {
                self.pin_input.pop();
            }
            KeyCode::Esc if self.pin_input.is_empty() => self.should_quit = true,
            KeyCode::Esc => self.pin_input.clear(),
            KeyCode::Enter => {
                let input = std::mem::take(&mut self.pin_input);
                if self.gate.try_unlock(&input) {
                    self.notifier.info("Vault Unlocked", "Welcome back to PassVault.");
                    self.app_status = "Unlocked.".to_string();
                    self.pending = Some(Action::Load);
                } else {
                    self.notifier.error("Authentication Failed", "Invalid PIN.");
                }
            }
            _ => {}
        }
    }

    fn on_normal_key(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('L') => self.lock(),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Tab | KeyCode::Char(']') => self.switch_section(self.section.next()),
            KeyCode::BackTab | KeyCode::Char('[') => self.switch_section(self.section.previous()),
            KeyCode::Char(c @ '1'..='4') => {
                let idx = c as usize - '1' as usize;
                self.switch_section(Section::ALL[idx]);
            }
            KeyCode::Char('r') => self.pending = Some(Action::Load),
            KeyCode::Char('a') => {
                self.input_mode = InputMode::Form(RecordForm::blank(self.section));
                self.app_status = "Adding new entry... (Esc to cancel)".to_string();
                log::info!("Opened add form for {:?}", self.section);
            }
            KeyCode::Char('e') => self.open_edit_form(),
            KeyCode::Char('d') => match self.selected_id() {
                Some(id) => self.pending = Some(Action::Delete(id)),
                None => self.app_status = "No entry selected to delete.".to_string(),
            },
            KeyCode::Char('p') if self.section == Section::Insurance => match self.selected_id() {
                Some(id) => self.pending = Some(Action::TogglePaid(id)),
                None => self.app_status = "No policy selected.".to_string(),
            },
            KeyCode::Char('v') if self.section.category().is_some() => {
                self.show_secret = !self.show_secret;
            }
            KeyCode::Char('c') | KeyCode::Char('x') if self.section.category().is_some() => {
                let Some(id) = self.selected_id() else {
                    self.app_status = "No entry selected to copy.".to_string();
                    return;
                };
                let found = self.vault.credentials().iter().find(|c| c.id == id).cloned();
                if let Some(entry) = found {
                    if key_event.code == KeyCode::Char('c') {
                        self.copy_to_clipboard(entry.username, "Username");
                    } else {
                        self.copy_to_clipboard(entry.password, "Password");
                    }
                }
            }
            KeyCode::Char('s') => self.export(false),
            KeyCode::Char('S') => self.export(true),
            KeyCode::Char('i') => {
                self.input_mode = InputMode::Import { path: String::new() };
                self.app_status = "Path of the CSV file to import (Enter to import, Esc to cancel)".to_string();
            }
            _ => {}
        }
    }

    fn open_edit_form(&mut self) {
        let Some(id) = self.selected_id() else {
            self.app_status = "No entry selected to edit.".to_string();
            return;
        };
        let form = match self.section {
            Section::Social | Section::Personal => self
                .vault
                .credentials()
                .iter()
                .find(|c| c.id == id)
                .map(|c| RecordForm::credential(self.section, Some(id.clone()), &c.to_draft())),
            Section::Miscellaneous => self
                .vault
                .vehicles()
                .iter()
                .find(|v| v.id == id)
                .map(|v| RecordForm::vehicle(Some(id.clone()), &v.to_draft())),
            Section::Insurance => self
                .vault
                .insurances()
                .iter()
                .find(|p| p.id == id)
                .map(|p| RecordForm::insurance(Some(id.clone()), &p.to_draft())),
        };
        if let Some(form) = form {
            log::info!("Opened edit form for {:?} record {}", self.section, id);
            self.app_status = "Editing... (Esc to cancel)".to_string();
            self.input_mode = InputMode::Form(form);
        }
    }

    fn on_form_key(&mut self, mut form: RecordForm, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Esc => {
                self.app_status = if form.editing_id.is_some() {
                    "Edit cancelled.".to_string()
                } else {
                    "Add new entry cancelled.".to_string()
                };
                return;
            }
            KeyCode::Char('g') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                if let Err(e) = form.fill_generated_secret() {
                    self.app_status = e;
                }
            }
            KeyCode::Char(c) => form.type_char(c),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Left => form.cycle_choice(false),
            KeyCode::Right => form.cycle_choice(true),
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.previous_field(),
            KeyCode::Enter if form.focus + 1 < form.fields.len() => form.next_field(),
            KeyCode::Enter => match form.validate() {
                Ok(()) => self.pending = Some(Action::Submit),
                Err(message) => self.app_status = format!("{} (Esc to cancel, Tab to edit)", message),
            },
            _ => {}
        }
        self.input_mode = InputMode::Form(form);
    }

    fn on_import_key(&mut self, mut path: String, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Esc => {
                self.app_status = "Import cancelled.".to_string();
                return;
            }
            KeyCode::Enter if !path.trim().is_empty() => {
                self.pending = Some(Action::Import(PathBuf::from(path.trim())));
                return;
            }
            KeyCode::Char(c) => path.push(c),
            KeyCode::Backspace => {
                path.pop();
            }
            _ => {}
        }
        self.input_mode = InputMode::Import { path };
    }

    fn export(&mut self, all: bool) {
        let export = if all {
            self.vault.export_all()
        } else {
            self.vault.export_section(self.section)
        };
        let Some(export) = export else {
            self.notifier.info("Nothing to Export", "There are no records to export.");
            return;
        };
        match export.write_to(&self.export_dir) {
            Ok(path) => {
                self.notifier.info("Export Complete", format!("{} saved.", export.file_name));
                self.app_status = format!("Exported to {}", path.display());
            }
            Err(e) => {
                self.notifier.error("Export Failed", e.to_string());
            }
        }
    }

    fn run_action(&mut self, action: Action) {
        log::debug!("Running action {:?}", action);
        match action {
            Action::Load => match self.vault.load_all(today()) {
                Ok(()) => self.app_status = format!("Loaded {} entries.", self.vault.count(self.section)),
                Err(e) => {
                    self.notifier.error("Fetch Error", e.to_string());
                }
            },
            Action::Submit => self.submit_form(),
            Action::Delete(id) => self.delete(&id),
            Action::TogglePaid(id) => match self.vault.toggle_paid(&id) {
                Ok(now_paid) => {
                    let name = self
                        .vault
                        .insurances()
                        .iter()
                        .find(|p| p.id == id)
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    let title = if now_paid { "Marked as Paid" } else { "Marked as Unpaid" };
                    self.notifier.info(title, name);
                }
                Err(e) => {
                    self.notifier.error("Update Error", e.to_string());
                }
            },
            Action::Import(path) => match self.vault.import_file(&path, today()) {
                Ok(batches) => {
                    self.notifier.info(
                        "Imported",
                        format!(
                            "Data synced successfully. {} records, {} skipped.",
                            batches.total(),
                            batches.skipped
                        ),
                    );
                }
                Err(e) => {
                    self.notifier.error("Import Failed", e.to_string());
                }
            },
        }
        self.clamp_selection();
    }

    fn submit_form(&mut self) {
        let InputMode::Form(form) = &self.input_mode else {
            return;
        };
        let form = form.clone();
        let result: Result<(&str, String), VaultError> = match (form.section, form.editing_id.as_deref()) {
            (Section::Social | Section::Personal, None) => {
                let draft = form.credential_draft();
                self.vault
                    .add_credential(&draft)
                    .map(|_| ("Entry Added", format!("{} saved.", draft.service)))
            }
            (Section::Social | Section::Personal, Some(id)) => self
                .vault
                .update_credential(id, form.credential_draft())
                .map(|_| ("Updated", "Changes saved.".to_string())),
            (Section::Miscellaneous, None) => {
                let draft = form.vehicle_draft();
                self.vault
                    .add_vehicle(&draft)
                    .map(|_| ("Vehicle Added", format!("{} added.", draft.name)))
            }
            (Section::Miscellaneous, Some(id)) => self
                .vault
                .update_vehicle(id, form.vehicle_draft())
                .map(|_| ("Updated", "Changes saved.".to_string())),
            (Section::Insurance, None) => {
                let draft = form.insurance_draft();
                self.vault
                    .add_insurance(&draft)
                    .map(|_| ("Insurance Added", format!("{} policy saved.", draft.name)))
            }
            (Section::Insurance, Some(id)) => self
                .vault
                .update_insurance(id, form.insurance_draft())
                .map(|_| ("Updated", "Insurance policy updated.".to_string())),
        };

        match result {
            Ok((title, description)) => {
                self.notifier.info(title, description);
                self.input_mode = InputMode::Normal;
                self.app_status = String::new();
                if form.editing_id.is_none() {
                    self.table_state.select(Some(0)); // new records are prepended
                }
            }
            Err(e) => {
                let title = if form.editing_id.is_some() { "Update Error" } else { "Error Saving" };
                self.notifier.error(title, e.to_string());
            }
        }
    }

    fn delete(&mut self, id: &str) {
        let result = match self.section {
            Section::Social | Section::Personal => self
                .vault
                .delete_credential(id)
                .map(|_| ("Entry Removed", "The password record has been deleted.")),
            Section::Miscellaneous => self
                .vault
                .delete_vehicle(id)
                .map(|_| ("Record Deleted", "The vehicle record has been removed.")),
            Section::Insurance => self
                .vault
                .delete_insurance(id)
                .map(|_| ("Policy Removed", "The insurance record has been deleted.")),
        };
        match result {
            Ok((title, description)) => {
                self.notifier.info(title, description);
            }
            Err(e) => {
                self.notifier.error("Delete Error", e.to_string());
            }
        }
    }
}

pub fn run_tui(config: &Config) -> AppResult<()> {
    log::info!("Initializing TUI...");
    let store = SupabaseStore::new(&config.remote)?;
    let mut app = App::new(Vault::new(store), config);

    enable_raw_mode().map_err(|e| { log::error!("Failed to enable raw mode: {}", e); TuiError::Io(e) })?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .map_err(|e| { log::error!("Failed to setup terminal screen: {}", e); TuiError::Io(e) })?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|e| { log::error!("Failed to create terminal: {}", e); TuiError::Io(e) })?;

    log::info!("Starting TUI application loop.");
    let res = run_app_loop(&mut terminal, &mut app);
    log::info!("TUI application loop finished.");

    disable_raw_mode().map_err(|e| { log::error!("Failed to disable raw mode: {}", e); TuiError::Io(e) })?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)
        .map_err(|e| { log::error!("Failed to restore terminal screen: {}", e); TuiError::Io(e) })?;

    res?;
    log::info!("TUI shutdown complete.");
    Ok(())
}

fn run_app_loop<S: RemoteStore>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App<S>,
) -> Result<(), TuiError> {
    while !app.should_quit {
        app.tick(Instant::now());
        terminal.draw(|f| ui(f, app)).map_err(|e| { log::error!("Terminal draw error: {}", e); TuiError::Io(e) })?;

        // The frame above shows the loading indicator; now run the queued remote call.
        if let Some(action) = app.pending.take() {
            app.run_action(action);
            continue;
        }

        if event::poll(Duration::from_millis(100)).map_err(|e| { log::error!("Event poll error: {}", e); TuiError::Io(e) })? {
            if let Event::Key(key_event) = event::read().map_err(|e| { log::error!("Event read error: {}", e); TuiError::Io(e) })? {
                if key_event.kind == KeyEventKind::Press {
                    app.on_key(key_event);
                }
            }
        }
    }
    Ok(())
}

fn draw_lock_screen<S: RemoteStore>(f: &mut Frame, app: &App<S>) {
    let area = centered_rect(40, 30, f.size());
    let block = Block::default().borders(Borders::ALL).title("PassVault");
    let masked = "•".repeat(app.pin_input.chars().count());
    let text = vec![
        Line::from(Span::styled("Vault locked", Style::default().bold())),
        Line::from(""),
        Line::from(vec![Span::raw("PIN: "), Span::styled(format!("{}▋", masked), Style::default().fg(Color::Yellow))]),
        Line::from(""),
        Line::from("(Enter) Unlock | (Esc) Clear / Quit"),
    ];
    f.render_widget(Paragraph::new(text).block(block).alignment(Alignment::Center), area);
}

fn draw_sidebar<S: RemoteStore>(f: &mut Frame, app: &App<S>, area: Rect) {
    let items: Vec<ListItem> = Section::ALL
        .iter()
        .enumerate()
        .map(|(idx, section)| {
            let label = format!("{} {} ({})", idx + 1, section.title(), app.vault.count(*section));
            let style = if *section == app.section {
                Style::default().add_modifier(Modifier::BOLD).fg(Color::Cyan)
            } else {
                Style::default()
            };
            ListItem::new(Span::styled(label, style))
        })
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Sections"));
    f.render_widget(list, area);
}

fn credential_rows<S: RemoteStore>(app: &App<S>) -> (Vec<Row<'static>>, Vec<Constraint>, Row<'static>) {
    let category = app.section.category().unwrap_or_default();
    let selected = app.table_state.selected();
    let rows = app
        .vault
        .credentials_in(category)
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            let secret = if app.show_secret && selected == Some(idx) { c.password.clone() } else { MASK.to_string() };
            Row::new(vec![Cell::from(c.service.clone()), Cell::from(c.username.clone()), Cell::from(secret)])
        })
        .collect();
    let header = Row::new(vec!["Service", "Username / Email", "Password"]);
    (rows, vec![Constraint::Percentage(30), Constraint::Percentage(40), Constraint::Percentage(30)], header)
}

fn insurance_rows<S: RemoteStore>(app: &App<S>, today: NaiveDate) -> (Vec<Row<'static>>, Vec<Constraint>, Row<'static>) {
    let rows = app
        .vault
        .insurances()
        .iter()
        .map(|p| {
            let (marker, style) = match p.due_status(today) {
                DueStatus::PastDue => (" PAST DUE", Style::default().fg(Color::Red).bold()),
                DueStatus::DueSoon => (" DUE SOON", Style::default().fg(Color::Yellow)),
                _ => ("", Style::default()),
            };
            let comments = if p.comments.is_empty() { "-".to_string() } else { p.comments.clone() };
            let paid = if p.is_paid {
                Span::styled("Paid", Style::default().fg(Color::Green))
            } else {
                Span::raw("Unpaid")
            };
            Row::new(vec![
                Cell::from(p.name.clone()),
                Cell::from(Span::styled(format!("{}{}", p.due_date, marker), style)),
                Cell::from(p.premium.clone()),
                Cell::from(comments),
                Cell::from(paid),
            ])
        })
        .collect();
    let header = Row::new(vec!["Insurance / Service", "Due Date", "Premium", "Comments", "Status"]);
    let widths = vec![
        Constraint::Percentage(25),
        Constraint::Percentage(22),
        Constraint::Percentage(15),
        Constraint::Percentage(26),
        Constraint::Percentage(12),
    ];
    (rows, widths, header)
}

fn vehicle_rows<S: RemoteStore>(app: &App<S>) -> (Vec<Row<'static>>, Vec<Constraint>, Row<'static>) {
    let rows = app
        .vault
        .vehicles()
        .iter()
        .map(|v| {
            Row::new(vec![
                Cell::from(v.name.clone()),
                Cell::from(v.vehicle_type.as_str()),
                Cell::from(v.last_service.clone()),
                Cell::from(Span::styled(v.next_service.clone(), Style::default().fg(Color::Yellow))),
            ])
        })
        .collect();
    let header = Row::new(vec!["Name", "Type", "Last Service", "Next Due"]);
    let widths = vec![
        Constraint::Percentage(40),
        Constraint::Percentage(12),
        Constraint::Percentage(24),
        Constraint::Percentage(24),
    ];
    (rows, widths, header)
}

fn draw_records<S: RemoteStore>(f: &mut Frame, app: &mut App<S>, area: Rect) {
    let title = format!("{} ({})", app.section.title(), app.vault.count(app.section));
    let block = Block::default().borders(Borders::ALL).title(title);

    if app.is_loading() {
        let text = Paragraph::new("Syncing vault contents...")
            .block(block)
            .alignment(Alignment::Center);
        f.render_widget(text, area);
        return;
    }

    let today = today();
    let (rows, widths, header) = match app.section {
        Section::Social | Section::Personal => credential_rows(app),
        Section::Insurance => insurance_rows(app, today),
        Section::Miscellaneous => vehicle_rows(app),
    };

    if rows.is_empty() {
        let empty = match app.section {
            Section::Insurance => "No insurance policies found.",
            Section::Miscellaneous => "No vehicles registered.",
            _ => "No entries found.",
        };
        f.render_widget(Paragraph::new(empty).block(block).alignment(Alignment::Center), area);
        return;
    }

    let (table_area, detail_area) = if app.section == Section::Miscellaneous {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(3)].as_ref())
            .split(area);
        (chunks[0], Some(chunks[1]))
    } else {
        (area, None)
    };

    let table = Table::new(rows, widths)
        .header(header.style(Style::default().add_modifier(Modifier::BOLD).fg(Color::Gray)))
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::BOLD).bg(Color::DarkGray))
        .highlight_symbol("> ");
    f.render_stateful_widget(table, table_area, &mut app.table_state);

    if let Some(detail_area) = detail_area {
        let selected = app.table_state.selected().and_then(|idx| app.vault.vehicles().get(idx));
        let gauge_block = Block::default().borders(Borders::ALL).title("Service Progress");
        match selected.and_then(|v| v.service_progress(today)) {
            Some(percent) => {
                let gauge = Gauge::default()
                    .block(gauge_block)
                    .gauge_style(Style::default().fg(Color::Blue))
                    .percent(percent.round() as u16)
                    .label(format!("{}%", percent.round()));
                f.render_widget(gauge, detail_area);
            }
            None => f.render_widget(Paragraph::new("-").block(gauge_block), detail_area),
        }
    }
}

fn draw_main_ui<S: RemoteStore>(f: &mut Frame, app: &mut App<S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(f.size());

    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(30), Constraint::Min(0)].as_ref())
        .split(chunks[0]);

    draw_sidebar(f, app, main_chunks[0]);
    draw_records(f, app, main_chunks[1]);

    let keys = match app.section {
        Section::Social | Section::Personal => "(v) Show | (c) Copy User | (x) Copy Pass",
        Section::Insurance => "(p) Paid/Unpaid",
        Section::Miscellaneous => "",
    };
    let status_text = match app.input_mode {
        InputMode::Normal => format!(
            "{} | (q) Quit | (L) Lock | (Tab/1-4) Section | (a) Add | (e) Edit | (d) Del | {} | (s/S) Export | (i) Import | (r) Reload",
            app.app_status, keys
        ),
        _ => app.app_status.clone(),
    };
    let status_paragraph = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(Wrap { trim: true });
    f.render_widget(status_paragraph, chunks[1]);
}

fn draw_editing_form(f: &mut Frame, form: &RecordForm) {
    let height = (form.fields.len() as u16) * 3 + 5;
    let form_area = centered_rect_abs(60, height, f.size());
    f.render_widget(Clear, form_area);
    f.render_widget(Block::default().title(form.title()).borders(Borders::ALL), form_area);

    let mut constraints: Vec<Constraint> = form.fields.iter().map(|_| Constraint::Length(3)).collect();
    constraints.push(Constraint::Min(0));
    constraints.push(Constraint::Length(1));
    let form_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(constraints)
        .split(form_area);

    for (i, field) in form.fields.iter().enumerate() {
        let focused = form.focus == i;
        let shown = match field.kind {
            FieldKind::Choice(_) => format!("< {} >", field.value),
            _ if focused => format!("{}▋", field.value),
            _ => field.value.clone(),
        };
        let paragraph = Paragraph::new(shown)
            .block(Block::default().borders(Borders::ALL).title(field.label))
            .style(if focused { Style::default().fg(Color::Yellow) } else { Style::default() });
        f.render_widget(paragraph, form_chunks[i]);
    }

    let help_text = "(Tab) Next | (Enter) Next/Save | (Space/←/→) Choose | (Esc) Cancel";
    let help_paragraph = Paragraph::new(help_text).alignment(Alignment::Center);
    f.render_widget(help_paragraph, form_chunks[form.fields.len() + 1]);
}

fn draw_import_prompt(f: &mut Frame, path: &str) {
    let area = centered_rect_abs(60, 5, f.size());
    f.render_widget(Clear, area);
    let paragraph = Paragraph::new(format!("{}▋", path))
        .block(Block::default().borders(Borders::ALL).title("Import CSV file"))
        .style(Style::default().fg(Color::Yellow));
    f.render_widget(paragraph, area);
}

fn draw_toasts<S: RemoteStore>(f: &mut Frame, app: &App<S>) {
    if app.notifier.is_empty() {
        return;
    }
    let screen = f.size();
    let width = 44.min(screen.width);
    let mut bottom = screen.height.saturating_sub(3);
    let toasts: Vec<_> = app.notifier.active().collect();
    for toast in toasts.iter().rev() {
        let height = if toast.description.is_some() { 4 } else { 3 };
        if bottom < height {
            break;
        }
        bottom -= height;
        let rect = Rect::new(screen.width.saturating_sub(width), bottom, width, height);
        let style = match toast.variant {
            Variant::Destructive => Style::default().fg(Color::White).bg(Color::Red),
            Variant::Default => Style::default(),
        };
        let mut lines = vec![Line::from(Span::styled(toast.title.clone(), Style::default().bold()))];
        if let Some(description) = &toast.description {
            lines.push(Line::from(description.clone()));
        }
        f.render_widget(Clear, rect);
        f.render_widget(
            Paragraph::new(lines)
                .style(style)
                .block(Block::default().borders(Borders::ALL))
                .wrap(Wrap { trim: true }),
            rect,
        );
    }
}

/// Renders the UI widgets based on the application mode.
fn ui<S: RemoteStore>(f: &mut Frame, app: &mut App<S>) {
    if app.gate.is_locked() {
        draw_lock_screen(f, app);
    } else {
        draw_main_ui(f, app);
        match &app.input_mode {
            InputMode::Form(form) => draw_editing_form(f, form),
            InputMode::Import { path } => draw_import_prompt(f, path),
            InputMode::Normal => {}
        }
    }
    draw_toasts(f, app);
}

/// Helper to create a centered rect for popups.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Like [`centered_rect`] but with a fixed height in rows.
fn centered_rect_abs(percent_x: u16, height: u16, r: Rect) -> Rect {
    let height = height.min(r.height);
    let row = Rect::new(r.x, r.y + (r.height - height) / 2, r.width, height);
    centered_rect(percent_x, 100, row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{Call, MemoryStore};
    use crate::remote::{CREDENTIALS_TABLE, INSURANCES_TABLE};
    use serde_json::json;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_str<S: RemoteStore>(app: &mut App<S>, text: &str) {
        for c in text.chars() {
            app.on_key(key(KeyCode::Char(c)));
        }
    }

    fn settle<S: RemoteStore>(app: &mut App<S>) {
        while let Some(action) = app.pending.take() {
            app.run_action(action);
        }
    }

    fn unlocked_app() -> App<MemoryStore> {
        let store = MemoryStore::new();
        store.seed(CREDENTIALS_TABLE, json!({"service": "Facebook", "username": "john", "password": "pw", "category": "social"}));
        store.seed(INSURANCES_TABLE, json!({"name": "Home", "due_date": "2099-01-01", "premium": "$10", "comments": "", "is_paid": false}));
        let mut app = App::new(Vault::new(store), &Config::default());
        type_str(&mut app, "1218");
        app.on_key(key(KeyCode::Enter));
        settle(&mut app);
        app
    }

    thread_local! {
        static CAPTURED: std::cell::RefCell<Vec<String>> = std::cell::RefCell::new(Vec::new());
    }

    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            CAPTURED.with(|c| c.borrow_mut().push(record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    #[test]
    fn test_typed_pin_and_password_are_not_logged() {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);

        let mut app = unlocked_app();
        app.on_key(key(KeyCode::Char('a')));
        app.on_key(key(KeyCode::Tab));
        app.on_key(key(KeyCode::Tab));
        type_str(&mut app, "Zq9xPw");
        app.on_key(key(KeyCode::Esc));

        let captured = CAPTURED.with(|c| c.borrow().clone());
        assert!(!captured.is_empty());
        for message in &captured {
            assert!(!message.contains("Char('1')") && !message.contains("1218"), "{}", message);
            assert!(!message.contains("Char('Z')") && !message.contains("Zq9xPw"), "{}", message);
        }
    }

    #[test]
    fn test_wrong_pin_stays_locked() {
        let mut app = App::new(Vault::new(MemoryStore::new()), &Config::default());
        type_str(&mut app, "0000");
        app.on_key(key(KeyCode::Enter));
        assert!(app.gate.is_locked());
        assert!(app.pending.is_none());
        let toast = app.notifier.active().last().unwrap();
        assert_eq!(toast.title, "Authentication Failed");
        assert_eq!(toast.variant, Variant::Destructive);
    }

    #[test]
    fn test_unlock_triggers_initial_load() {
        let app = unlocked_app();
        assert!(!app.gate.is_locked());
        assert_eq!(app.vault.credentials().len(), 1);
        assert_eq!(app.selected_id(), Some(app.vault.credentials()[0].id.clone()));
    }

    #[test]
    fn test_add_credential_through_form() {
        let mut app = unlocked_app();
        app.on_key(key(KeyCode::Char('2')));
        app.on_key(key(KeyCode::Char('a')));
        type_str(&mut app, "Gmail");
        app.on_key(key(KeyCode::Tab));
        type_str(&mut app, "john.doe");
        app.on_key(key(KeyCode::Tab));
        type_str(&mut app, "GooglePassKey!8");
        app.on_key(key(KeyCode::Enter));
        assert_eq!(app.pending, Some(Action::Submit));
        settle(&mut app);

        assert!(matches!(app.input_mode, InputMode::Normal));
        let personal = app.vault.credentials_in(crate::models::Category::Personal);
        assert_eq!(personal.len(), 1);
        assert_eq!(personal[0].service, "Gmail");
        assert_eq!(app.notifier.active().last().unwrap().title, "Entry Added");
    }

    #[test]
    fn test_form_validation_blocks_submit() {
        let mut app = unlocked_app();
        app.on_key(key(KeyCode::Char('a')));
        for _ in 0..3 {
            app.on_key(key(KeyCode::Enter));
        }
        assert!(app.pending.is_none());
        assert!(app.app_status.starts_with("Service cannot be empty."));
        assert!(matches!(app.input_mode, InputMode::Form(_)));
    }

    #[test]
    fn test_failed_save_keeps_form_open() {
        let mut app = unlocked_app();
        app.vault.store().fail_writes_on(CREDENTIALS_TABLE, "duplicate key value");
        app.on_key(key(KeyCode::Char('a')));
        type_str(&mut app, "X");
        app.on_key(key(KeyCode::Tab));
        app.on_key(key(KeyCode::Tab));
        type_str(&mut app, "pw");
        app.on_key(key(KeyCode::Enter));
        settle(&mut app);

        assert!(matches!(app.input_mode, InputMode::Form(_)));
        let toast = app.notifier.active().last().unwrap();
        assert_eq!(toast.title, "Error Saving");
        assert_eq!(toast.description.as_deref(), Some("duplicate key value"));
    }

    #[test]
    fn test_toggle_paid_and_delete_in_insurance_section() {
        let mut app = unlocked_app();
        app.on_key(key(KeyCode::Char('3')));
        app.on_key(key(KeyCode::Char('p')));
        settle(&mut app);
        assert!(app.vault.insurances()[0].is_paid);
        assert_eq!(app.notifier.active().last().unwrap().title, "Marked as Paid");

        app.on_key(key(KeyCode::Char('d')));
        settle(&mut app);
        assert!(app.vault.insurances().is_empty());
        assert_eq!(app.vault.store().count(|c| matches!(c, Call::Delete(..))), 1);
        assert_eq!(app.table_state.selected(), None);
    }

    #[test]
    fn test_edit_prefills_form() {
        let mut app = unlocked_app();
        app.on_key(key(KeyCode::Char('e')));
        let InputMode::Form(form) = &app.input_mode else {
            panic!("expected edit form");
        };
        assert_eq!(form.credential_draft(), app.vault.credentials()[0].to_draft());
        assert!(form.editing_id.is_some());
    }

    #[test]
    fn test_lock_clears_lists() {
        let mut app = unlocked_app();
        app.on_key(key(KeyCode::Char('L')));
        assert!(app.gate.is_locked());
        assert!(app.vault.credentials().is_empty());
    }

    #[test]
    fn test_generated_secret_fills_password_field() {
        let mut form = RecordForm::blank(Section::Social);
        form.fill_generated_secret().unwrap();
        assert_eq!(form.focus, 2);
        assert_eq!(form.value(2).len(), SecretCriteria::default().length);
        assert!(RecordForm::blank(Section::Insurance).fill_generated_secret().is_err());
    }

    #[test]
    fn test_vehicle_form_rejects_bad_dates() {
        let mut form = RecordForm::blank(Section::Miscellaneous);
        form.fields[0].value = "Sedan".into();
        form.fields[2].value = "2024-01-01".into();
        form.fields[3].value = "next spring".into();
        assert!(form.validate().unwrap_err().contains("Next Service"));

        form.fields[3].value = "2024-06-01".into();
        form.focus = 1;
        form.cycle_choice(true);
        assert!(form.validate().is_ok());
        assert_eq!(form.vehicle_draft().vehicle_type, VehicleType::Bike);
    }
}
