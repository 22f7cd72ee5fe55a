// ABOUTME: Integration tests for validated domain types.
// ABOUTME: Tests application name acceptance, jail-specific rejections and derived unit names.

use jailwarden::jail::{Slot, unit_name};
use jailwarden::types::*;
use proptest::prelude::*;

mod app_name_tests {
    use super::*;

    #[test]
    fn accepts_lowercase_digits_and_hyphens() {
        let name = AppName::new("shop-2").unwrap();
        assert_eq!(name.as_str(), "shop-2");
        assert_eq!(name.to_string(), "shop-2");
        assert_eq!("shop-2".parse::<AppName>().unwrap(), name);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(AppName::new(""), Err(AppNameError::Empty));
    }

    #[test]
    fn must_start_with_a_letter() {
        assert_eq!(AppName::new("-shop"), Err(AppNameError::LeadingNonLetter('-')));
        assert_eq!(AppName::new("2shop"), Err(AppNameError::LeadingNonLetter('2')));
        assert_eq!(AppName::new("1234"), Err(AppNameError::LeadingNonLetter('1')));
    }

    #[test]
    fn rejects_trailing_hyphen() {
        assert_eq!(AppName::new("shop-"), Err(AppNameError::TrailingHyphen));
    }

    #[test]
    fn rejects_names_jail_would_misread() {
        assert_eq!(AppName::new("Shop"), Err(AppNameError::Uppercase));
        assert_eq!(AppName::new("shop.web"), Err(AppNameError::NestedJail));
        assert_eq!(AppName::new("shop_web"), Err(AppNameError::Underscore));
        assert_eq!(AppName::new("shop web"), Err(AppNameError::InvalidChar(' ')));
    }

    #[test]
    fn longest_name_still_fits_a_jail_name() {
        let longest = "a".repeat(MAX_APP_NAME_LEN);
        let name = AppName::new(&longest).unwrap();
        for slot in Slot::ALL {
            assert!(unit_name(name.as_str(), slot).len() <= 63);
        }
        assert_eq!(unit_name(name.as_str(), Slot::Green).len(), 63);
        assert_eq!(
            AppName::new(&format!("{longest}a")),
            Err(AppNameError::TooLong(MAX_APP_NAME_LEN + 1))
        );
    }
}

proptest! {
    #[test]
    fn valid_names_round_trip(name in "[a-z]([a-z0-9-]{0,40}[a-z0-9])?") {
        let parsed = AppName::new(&name).unwrap();
        prop_assert_eq!(parsed.as_str(), name.as_str());
    }

    #[test]
    fn names_with_underscores_are_rejected(prefix in "[a-z]{1,10}", suffix in "[a-z]{1,10}") {
        let name = format!("{prefix}_{suffix}");
        prop_assert_eq!(AppName::new(&name), Err(AppNameError::Underscore));
    }

    #[test]
    fn unit_names_split_back_into_app_and_slot(name in "[a-z][a-z0-9-]{0,30}[a-z0-9]") {
        let app = AppName::new(&name).unwrap();
        for slot in Slot::ALL {
            let unit = unit_name(app.as_str(), slot);
            let (prefix, label) = unit.rsplit_once('_').unwrap();
            prop_assert_eq!(prefix, app.as_str());
            prop_assert_eq!(label, slot.label());
        }
    }
}
