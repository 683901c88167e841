//! Domain identifier types with validation
//!
//! Newtype wrappers for every record identifier Wardflow handles. Each type is
//! distinct so a prescription id can never be passed where a visit id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, rejecting blank input
            pub fn new(id: impl Into<String>) -> Result<Self, String> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(format!("{} cannot be empty", $label));
                }
                Ok(Self(id))
            }

            /// Returns the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes self and returns the inner String
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Visit identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use wardflow::domain::ids::VisitId;
    ///
    /// let id = VisitId::generate();
    /// assert_eq!(id.as_str().len(), 36);
    /// ```
    VisitId,
    "Visit ID"
);

string_id!(
    /// Patient identifier, owned by the patient directory
    PatientId,
    "Patient ID"
);

string_id!(
    /// Appointment identifier, owned by the appointment service
    AppointmentId,
    "Appointment ID"
);

string_id!(
    /// Prescription identifier
    PrescriptionId,
    "Prescription ID"
);

string_id!(
    /// Medication (inventory item) identifier
    MedicationId,
    "Medication ID"
);

string_id!(
    /// Lab test identifier
    LabTestId,
    "Lab test ID"
);

string_id!(
    /// Billing line identifier
    BillingLineId,
    "Billing line ID"
);

string_id!(
    /// Invoice identifier
    InvoiceId,
    "Invoice ID"
);

impl VisitId {
    /// Generates a fresh random visit id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl BillingLineId {
    /// Generates a fresh random billing line id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl InvoiceId {
    /// Generates a fresh random invoice id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
