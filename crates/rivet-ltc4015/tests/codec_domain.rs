//! 编解码往返律：域内物理量经编码再解码，偏差不超过一个 LSB。

use proptest::prelude::*;

use rivet_ltc4015::codec;
use rivet_ltc4015::{ChargeProfile, Chemistry};

fn li_profile() -> ChargeProfile {
    ChargeProfile {
        chemistry: Chemistry::LiIonProgrammable,
        cells: 4,
        r_snsb_uohm: 4_000,
        r_snsi_uohm: 3_000,
    }
}

fn pb_profile() -> ChargeProfile {
    ChargeProfile {
        chemistry: Chemistry::LeadAcidProgrammable,
        cells: 6,
        r_snsb_uohm: 4_000,
        r_snsi_uohm: 3_000,
    }
}

proptest! {
    #[test]
    fn vbat_round_trip(cell_uv in 0i64..8_000_000) {
        // 8 V/节以内两种刻度都不触及 16 位码域上限。
        for chem in [Chemistry::LiIonProgrammable, Chemistry::LeadAcidProgrammable] {
            let lsb = (chem.vbat_nv_per_lsb() + 999) / 1_000;
            let back = codec::vbat_cell_uv(chem, codec::vbat_raw(chem, cell_uv));
            prop_assert!((back - cell_uv).abs() <= lsb, "{chem:?}: {cell_uv} -> {back}");
        }
    }

    #[test]
    fn vin_round_trip(uv in 0i64..40_000_000) {
        let back = codec::vin_uv(codec::vin_raw(uv));
        prop_assert!((back - uv).abs() <= codec::VIN_VSYS_UV_PER_LSB);
    }

    #[test]
    fn current_round_trip(ua in -8_000_000i64..8_000_000) {
        let r = 4_000;
        let lsb = codec::CURRENT_UV_SCALE / r + 1;
        let back = codec::current_ua(codec::current_raw(ua, r), r);
        prop_assert!((back - ua).abs() <= lsb, "{ua} -> {back}");
    }

    #[test]
    fn die_temp_round_trip(mc in -40_000i64..150_000) {
        let lsb = codec::DIE_TEMP_NUM / codec::DIE_TEMP_DEN + 1;
        let back = codec::die_temp_mc(codec::die_temp_raw(mc));
        prop_assert!((back - mc).abs() <= lsb);
    }

    #[test]
    fn iin_limit_round_trip_within_domain(code in 0u16..=63) {
        let profile = li_profile();
        let ua = codec::iin_limit_ua(&profile, code);
        prop_assert_eq!(codec::iin_limit_code(&profile, ua), code);
    }

    #[test]
    fn icharge_round_trip_within_domain(code in 0u16..=31) {
        let profile = li_profile();
        let ua = codec::icharge_ua(&profile, code);
        prop_assert_eq!(codec::icharge_code(&profile, ua), code);
    }

    #[test]
    fn vin_uvcl_round_trip_within_domain(code in 0u16..=255) {
        let uv = codec::vin_uvcl_uv(code);
        prop_assert_eq!(codec::vin_uvcl_code(uv), code);
    }

    #[test]
    fn lead_acid_vcharge_round_trip(code in 0u16..=63) {
        let chem = pb_profile().chemistry;
        let mv = codec::vcharge_cell_uv(chem, code) / 1_000;
        let back = codec::vcharge_code(chem, mv, false);
        prop_assert!((i32::from(back) - i32::from(code)).abs() <= 1, "{code} -> {back}");
    }
}
