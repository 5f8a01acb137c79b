//! Pay calculation: payee profiles and the pure gross-pay / commission /
//! company-revenue math.
//!
//! Everything here is a pure function of its inputs. The calculator runs once
//! when a shipment is delivered and its result is frozen; it is never re-run
//! implicitly.

pub mod calc;
pub mod profile;

pub use calc::{PayInputs, PaySnapshot, PayWarning, company_revenue, compute_commission, compute_pay};
pub use profile::{DeductionPreferences, ExpenseCategory, PayProfile, PayType, PayeeId};
