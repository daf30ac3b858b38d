//! Operator catalog and APN credential selection.

use serde::Serialize;

/// Packet data credentials of a network operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OperatorProfile {
    /// Operator name as reported by `AT+COPS?` (matched as a substring).
    pub name: &'static str,
    pub apn: &'static str,
    pub user: Option<&'static str>,
    pub password: Option<&'static str>,
}

impl OperatorProfile {
    pub const fn new(
        name: &'static str,
        apn: &'static str,
        user: Option<&'static str>,
        password: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            apn,
            user,
            password,
        }
    }
}

pub const DEFAULT_OPERATORS: [OperatorProfile; 4] = [
    OperatorProfile::new(
        "Bee Line GSM",
        "internet.beeline.ru",
        Some("beeline"),
        Some("beeline"),
    ),
    OperatorProfile::new("MTS", "internet.mts.ru", Some("mts"), Some("mts")),
    OperatorProfile::new("MegaFon", "internet", Some("gdata"), Some("gdata")),
    OperatorProfile::new("TELE2", "internet.tele2.ru", None, None),
];

/// Find the catalog entry whose name occurs in `reported`.
pub fn lookup(catalog: &[OperatorProfile], reported: &str) -> Option<usize> {
    catalog
        .iter()
        .position(|profile| reported.contains(profile.name))
}

/// Returns the catalog index to use after the modem reported `reported` as
/// the current operator.
///
/// The current selection is kept when nothing in the catalog matches.
pub fn select_operator(catalog: &[OperatorProfile], current: usize, reported: &str) -> usize {
    match lookup(catalog, reported) {
        Some(idx) if idx != current => {
            info!(
                "Operator changed to {}, using APN {}",
                catalog[idx].name, catalog[idx].apn
            );
            idx
        }
        Some(_) => current,
        None => {
            warn!("Unknown operator {}, keeping previous APN", reported);
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mts_selects_mts_credentials() {
        let idx = select_operator(&DEFAULT_OPERATORS, 0, "MTS");
        let profile = DEFAULT_OPERATORS[idx];
        assert_eq!(profile.apn, "internet.mts.ru");
        assert_eq!(profile.user, Some("mts"));
        assert_eq!(profile.password, Some("mts"));
    }

    #[test]
    fn tele2_has_no_credentials() {
        let idx = select_operator(&DEFAULT_OPERATORS, 0, "TELE2");
        let profile = DEFAULT_OPERATORS[idx];
        assert_eq!(profile.apn, "internet.tele2.ru");
        assert_eq!(profile.user, None);
        assert_eq!(profile.password, None);
    }

    #[test]
    fn unknown_operator_keeps_selection() {
        assert_eq!(select_operator(&DEFAULT_OPERATORS, 2, "Vodafone"), 2);
        assert_eq!(select_operator(&DEFAULT_OPERATORS, 1, ""), 1);
    }

    #[test]
    fn substring_match() {
        assert_eq!(lookup(&DEFAULT_OPERATORS, "Bee Line GSM"), Some(0));
        assert_eq!(lookup(&DEFAULT_OPERATORS, "MegaFon RUS"), Some(2));
        assert_eq!(lookup(&[], "MTS"), None);
    }
}
