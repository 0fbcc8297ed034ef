use ecostress_sync::mgrs::epsg_from_mgrs;

#[test]
fn northern_bands_map_to_326() {
    for band in "NPQRSTUVWX".chars() {
        assert_eq!(epsg_from_mgrs(&format!("18{band}UN")), "EPSG32618");
    }
}

#[test]
fn southern_bands_map_to_327() {
    for band in "CDEFGHJKLM".chars() {
        assert_eq!(epsg_from_mgrs(&format!("47{band}DU")), "EPSG32747");
    }
}

#[test]
fn short_input_yields_nothing() {
    assert_eq!(epsg_from_mgrs(""), "");
    assert_eq!(epsg_from_mgrs("18"), "");
}

#[test]
fn only_prefix_is_read() {
    assert_eq!(epsg_from_mgrs("18T"), "EPSG32618");
    assert_eq!(epsg_from_mgrs("18TUN_extra"), "EPSG32618");
    // Lowercase bands are not in the northern set.
    assert_eq!(epsg_from_mgrs("18tun"), "EPSG32718");
}
