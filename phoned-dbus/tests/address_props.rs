//! Property tests for address normalization.

use phoned_dbus::{colon_to_raw, raw_to_colon, MacAddress};
use proptest::prelude::*;

proptest! {
    #[test]
    fn raw_colon_raw_is_identity(octets in any::<[u8; 6]>()) {
        let raw = MacAddress::new(octets).to_raw();
        let colon = raw_to_colon(&raw).unwrap();
        prop_assert_eq!(colon_to_raw(&colon).unwrap(), raw);
    }

    #[test]
    fn colon_form_parses_strictly(octets in any::<[u8; 6]>()) {
        let mac = MacAddress::new(octets);
        let parsed: MacAddress = mac.to_string().parse().unwrap();
        prop_assert_eq!(parsed, mac);
    }

    #[test]
    fn case_does_not_affect_identity(octets in any::<[u8; 6]>()) {
        let mac = MacAddress::new(octets);
        let lower = mac.to_raw().to_lowercase();
        prop_assert_eq!(MacAddress::normalize(&lower).unwrap(), mac);
    }

    #[test]
    fn wrong_digit_count_is_rejected(digits in "[0-9A-F]{0,24}") {
        prop_assume!(digits.len() != 12);
        prop_assert!(MacAddress::normalize(&digits).is_err());
        prop_assert!(raw_to_colon(&digits).is_err());
        prop_assert!(colon_to_raw(&digits).is_err());
    }

    #[test]
    fn modem_path_suffix_resolves_remote(local in any::<[u8; 6]>(), remote in any::<[u8; 6]>()) {
        let path = format!(
            "/hfp/{}_{}",
            MacAddress::new(local).to_raw(),
            MacAddress::new(remote).to_raw()
        );
        prop_assert_eq!(MacAddress::from_modem_path(&path).unwrap(), MacAddress::new(remote));
    }
}
