//! Shared `PKIStatusInfo` rule

use crate::error::{CmpError, Result};
use crate::message::PkiStatusInfo;

/// A positive status carries no failure code; a negative status carries exactly one.
pub fn check_status_info(info: &PkiStatusInfo) -> Result<()> {
    let fail_bits = info.fail_info.map(|f| f.len()).unwrap_or(0);
    if info.status.is_positive() {
        if fail_bits != 0 {
            return Err(CmpError::bad_data_format(format!(
                "Positive status {:?} must not carry failInfo",
                info.status
            )));
        }
    } else if fail_bits != 1 {
        return Err(CmpError::bad_data_format(format!(
            "Negative status {:?} must carry exactly one failInfo, found {}",
            info.status, fail_bits
        )));
    }
    Ok(())
}
