// src/models.rs
use chrono::{DateTime, Months, NaiveDate};

/// Parses the ISO date strings the store hands back, either `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Category {
    #[default]
    Social,
    Personal,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Social => "social",
            Category::Personal => "personal",
        }
    }

    /// Anything other than `personal` is treated as social.
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("personal") {
            Category::Personal
        } else {
            Category::Social
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VehicleType {
    #[default]
    Car,
    Bike,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "Car",
            VehicleType::Bike => "Bike",
        }
    }

    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("bike") {
            VehicleType::Bike
        } else {
            VehicleType::Car
        }
    }
}

/// The fields of a credential without its server-assigned id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialDraft {
    pub service: String,
    pub username: String,
    pub password: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub id: String,
    pub service: String,
    pub username: String,
    pub password: String, // stored and transmitted in clear text
    pub category: Category,
}

impl Credential {
    pub fn from_draft(id: String, draft: CredentialDraft) -> Self {
        Self {
            id,
            service: draft.service,
            username: draft.username,
            password: draft.password,
            category: draft.category,
        }
    }

    pub fn to_draft(&self) -> CredentialDraft {
        CredentialDraft {
            service: self.service.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            category: self.category,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleDraft {
    pub name: String,
    pub vehicle_type: VehicleType,
    pub last_service: String,
    pub next_service: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: String,
    pub name: String,
    pub vehicle_type: VehicleType,
    pub last_service: String,
    pub next_service: String,
}

impl Vehicle {
    pub fn from_draft(id: String, draft: VehicleDraft) -> Self {
        Self {
            id,
            name: draft.name,
            vehicle_type: draft.vehicle_type,
            last_service: draft.last_service,
            next_service: draft.next_service,
        }
    }

    pub fn to_draft(&self) -> VehicleDraft {
        VehicleDraft {
            name: self.name.clone(),
            vehicle_type: self.vehicle_type,
            last_service: self.last_service.clone(),
            next_service: self.next_service.clone(),
        }
    }

    /// Share of the service interval already elapsed, as a percentage clamped to `0..=100`.
    ///
    /// Returns `None` when either date is unparseable or the interval is empty.
    pub fn service_progress(&self, today: NaiveDate) -> Option<f64> {
        let last = parse_date(&self.last_service)?;
        let next = parse_date(&self.next_service)?;
        let total = (next - last).num_days();
        if total <= 0 {
            return None;
        }
        let elapsed = (today - last).num_days();
        Some((elapsed as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsuranceDraft {
    pub name: String,
    pub due_date: String,
    pub premium: String, // free text, e.g. "$50/mo"
    pub comments: String,
    pub is_paid: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insurance {
    pub id: String,
    pub name: String,
    pub due_date: String,
    pub premium: String,
    pub comments: String,
    pub is_paid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    PastDue,
    DueSoon,
    Upcoming,
    Unknown,
}

impl Insurance {
    pub fn from_draft(id: String, draft: InsuranceDraft) -> Self {
        Self {
            id,
            name: draft.name,
            due_date: draft.due_date,
            premium: draft.premium,
            comments: draft.comments,
            is_paid: draft.is_paid,
        }
    }

    pub fn to_draft(&self) -> InsuranceDraft {
        InsuranceDraft {
            name: self.name.clone(),
            due_date: self.due_date.clone(),
            premium: self.premium.clone(),
            comments: self.comments.clone(),
            is_paid: self.is_paid,
        }
    }

    pub fn due_status(&self, today: NaiveDate) -> DueStatus {
        let Some(due) = parse_date(&self.due_date) else {
            return DueStatus::Unknown;
        };
        let horizon = today.checked_add_months(Months::new(1)).unwrap_or(NaiveDate::MAX);
        if due < today {
            DueStatus::PastDue
        } else if due <= horizon {
            DueStatus::DueSoon
        } else {
            DueStatus::Upcoming
        }
    }

    /// Reminder reset applied on every load: a policy whose due date has passed shows as unpaid.
    /// Only the in-memory value changes.
    pub fn reset_paid_if_past_due(&mut self, today: NaiveDate) {
        if self.due_status(today) == DueStatus::PastDue {
            self.is_paid = false;
        }
    }
}

/// Sidebar sections of the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    Social,
    Personal,
    Insurance,
    Miscellaneous,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Social,
        Section::Personal,
        Section::Insurance,
        Section::Miscellaneous,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Section::Social => "Social Passwords",
            Section::Personal => "Personal Passwords",
            Section::Insurance => "Insurances",
            Section::Miscellaneous => "Miscellaneous",
        }
    }

    /// File stem used when exporting this section.
    pub fn export_name(&self) -> &'static str {
        match self {
            Section::Social => "social_passwords",
            Section::Personal => "personal_passwords",
            Section::Insurance => "insurance_policies",
            Section::Miscellaneous => "vehicles",
        }
    }

    /// The credential category shown by this section, if it is a password section.
    pub fn category(&self) -> Option<Category> {
        match self {
            Section::Social => Some(Category::Social),
            Section::Personal => Some(Category::Personal),
            _ => None,
        }
    }

    pub fn next(&self) -> Section {
        let idx = Section::ALL.iter().position(|s| s == self).unwrap_or(0);
        Section::ALL[(idx + 1) % Section::ALL.len()]
    }

    pub fn previous(&self) -> Section {
        let idx = Section::ALL.iter().position(|s| s == self).unwrap_or(0);
        Section::ALL[(idx + Section::ALL.len() - 1) % Section::ALL.len()]
    }
}
