//! Site reference table (impervious cover and drainage area).

use anyhow::{Context, Result, bail};
use std::collections::HashSet;

use super::csv_reader;
use crate::model::SiteInfo;

pub fn parse_sites(bytes: &[u8]) -> Result<Vec<SiteInfo>> {
    let mut rdr = csv_reader(bytes);
    let mut sites = Vec::new();
    let mut seen = HashSet::new();

    for (i, result) in rdr.deserialize::<SiteInfo>().enumerate() {
        let line = i + 2;
        let site = result.with_context(|| format!("site table line {}", line))?;
        if !seen.insert(site.site.clone()) {
            bail!("line {}: site {} listed twice", line, site.site);
        }
        sites.push(site);
    }

    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sites() {
        let csv = "site,name,impervious_pct,drainage_area_km2\nA,Upper Mill Creek,12.5,4.1\nB,Lower Mill Creek,,9.8\n";
        let sites = parse_sites(csv.as_bytes()).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].impervious_pct, Some(12.5));
        assert_eq!(sites[1].impervious_pct, None);
        assert_eq!(sites[1].name, "Lower Mill Creek");
    }

    #[test]
    fn test_parse_sites_rejects_duplicates() {
        let csv = "site,name\nA,x\nA,y\n";
        assert!(parse_sites(csv.as_bytes()).is_err());
    }
}
