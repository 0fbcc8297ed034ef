/// Latitude bands north of the equator.
const NORTHERN_BANDS: &str = "NPQRSTUVWX";

/// Derives the WGS 84 / UTM EPSG identifier (`EPSG326zz` north,
/// `EPSG327zz` south) from an MGRS tile designator.
///
/// Returns an empty string for input shorter than three characters. The zone
/// digits and band letter are not validated, so malformed input yields a
/// well-formed but meaningless identifier.
pub fn epsg_from_mgrs(tile: &str) -> String {
    let mut chars = tile.chars();
    let (Some(zone_hi), Some(zone_lo), Some(band)) = (chars.next(), chars.next(), chars.next())
    else {
        return String::new();
    };

    let prefix = if NORTHERN_BANDS.contains(band) {
        "EPSG326"
    } else {
        "EPSG327"
    };
    format!("{prefix}{zone_hi}{zone_lo}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn northern_and_southern_zones() {
        assert_eq!(epsg_from_mgrs("18TUN"), "EPSG32618");
        assert_eq!(epsg_from_mgrs("47MDU"), "EPSG32747");
    }

    #[test]
    fn short_input_is_empty() {
        assert_eq!(epsg_from_mgrs(""), "");
        assert_eq!(epsg_from_mgrs("1T"), "");
    }
}
