//! # Region Catalog
//!
//! The 32 federal entities of Mexico with the abbreviations the national
//! seismological service appends to its place strings
//! (`"12 km al SUR de PINOTEPA NACIONAL, OAX"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A Mexican federal entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Region {
    Aguascalientes,
    BajaCalifornia,
    BajaCaliforniaSur,
    Campeche,
    Chiapas,
    Chihuahua,
    CiudadDeMexico,
    Coahuila,
    Colima,
    Durango,
    EstadoDeMexico,
    Guanajuato,
    Guerrero,
    Hidalgo,
    Jalisco,
    Michoacan,
    Morelos,
    Nayarit,
    NuevoLeon,
    Oaxaca,
    Puebla,
    Queretaro,
    QuintanaRoo,
    SanLuisPotosi,
    Sinaloa,
    Sonora,
    Tabasco,
    Tamaulipas,
    Tlaxcala,
    Veracruz,
    Yucatan,
    Zacatecas,
}

impl Region {
    /// Every entity, alphabetical by full name.
    pub const ALL: [Region; 32] = [
        Region::Aguascalientes,
        Region::BajaCalifornia,
        Region::BajaCaliforniaSur,
        Region::Campeche,
        Region::Chiapas,
        Region::Chihuahua,
        Region::CiudadDeMexico,
        Region::Coahuila,
        Region::Colima,
        Region::Durango,
        Region::EstadoDeMexico,
        Region::Guanajuato,
        Region::Guerrero,
        Region::Hidalgo,
        Region::Jalisco,
        Region::Michoacan,
        Region::Morelos,
        Region::Nayarit,
        Region::NuevoLeon,
        Region::Oaxaca,
        Region::Puebla,
        Region::Queretaro,
        Region::QuintanaRoo,
        Region::SanLuisPotosi,
        Region::Sinaloa,
        Region::Sonora,
        Region::Tabasco,
        Region::Tamaulipas,
        Region::Tlaxcala,
        Region::Veracruz,
        Region::Yucatan,
        Region::Zacatecas,
    ];

    /// `(full name, abbreviation)` as published by the seismological service.
    fn names(&self) -> (&'static str, &'static str) {
        match self {
            Region::Aguascalientes => ("Aguascalientes", "AGS"),
            Region::BajaCalifornia => ("Baja California", "BC"),
            Region::BajaCaliforniaSur => ("Baja California Sur", "BCS"),
            Region::Campeche => ("Campeche", "CAMP"),
            Region::Chiapas => ("Chiapas", "CHIS"),
            Region::Chihuahua => ("Chihuahua", "CHIH"),
            Region::CiudadDeMexico => ("Ciudad de México", "CDMX"),
            Region::Coahuila => ("Coahuila", "COAH"),
            Region::Colima => ("Colima", "COL"),
            Region::Durango => ("Durango", "DGO"),
            Region::EstadoDeMexico => ("Estado de México", "MEX"),
            Region::Guanajuato => ("Guanajuato", "GTO"),
            Region::Guerrero => ("Guerrero", "GRO"),
            Region::Hidalgo => ("Hidalgo", "HGO"),
            Region::Jalisco => ("Jalisco", "JAL"),
            Region::Michoacan => ("Michoacán", "MICH"),
            Region::Morelos => ("Morelos", "MOR"),
            Region::Nayarit => ("Nayarit", "NAY"),
            Region::NuevoLeon => ("Nuevo León", "NL"),
            Region::Oaxaca => ("Oaxaca", "OAX"),
            Region::Puebla => ("Puebla", "PUE"),
            Region::Queretaro => ("Querétaro", "QRO"),
            Region::QuintanaRoo => ("Quintana Roo", "QROO"),
            Region::SanLuisPotosi => ("San Luis Potosí", "SLP"),
            Region::Sinaloa => ("Sinaloa", "SIN"),
            Region::Sonora => ("Sonora", "SON"),
            Region::Tabasco => ("Tabasco", "TAB"),
            Region::Tamaulipas => ("Tamaulipas", "TAMPS"),
            Region::Tlaxcala => ("Tlaxcala", "TLAX"),
            Region::Veracruz => ("Veracruz", "VER"),
            Region::Yucatan => ("Yucatán", "YUC"),
            Region::Zacatecas => ("Zacatecas", "ZAC"),
        }
    }

    /// Full display name, accents included.
    pub fn full_name(&self) -> &'static str {
        self.names().0
    }

    /// Upstream abbreviation, e.g. `OAX`.
    pub fn abbreviation(&self) -> &'static str {
        self.names().1
    }

    /// Looks a region up by abbreviation or full name. Case, surrounding
    /// whitespace and Spanish accents are ignored.
    pub fn lookup(text: &str) -> Option<Region> {
        let wanted = fold(text.trim());
        if wanted.is_empty() {
            return None;
        }
        Region::ALL.iter().copied().find(|r| {
            fold(r.abbreviation()) == wanted || fold(r.full_name()) == wanted
        })
    }

    /// Extracts the region from an upstream place string, which ends in
    /// `", <ABBR>"`.
    pub fn from_place(place: &str) -> Option<Region> {
        place.rsplit(',').next().and_then(Region::lookup)
    }
}

fn fold(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'Á' => 'a',
            'é' | 'É' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'Ó' => 'o',
            'ú' | 'Ú' | 'ü' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_name())
    }
}

/// Returned when a string names no known region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRegion(pub String);

impl fmt::Display for UnknownRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown region `{}`", self.0)
    }
}

impl std::error::Error for UnknownRegion {}

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::lookup(s).ok_or_else(|| UnknownRegion(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_complete_and_unique() {
        let mut abbrs: Vec<&str> = Region::ALL.iter().map(|r| r.abbreviation()).collect();
        abbrs.sort();
        abbrs.dedup();
        assert_eq!(abbrs.len(), 32);
    }

    #[test]
    fn lookup_ignores_case_and_accents() {
        assert_eq!(Region::lookup("oax"), Some(Region::Oaxaca));
        assert_eq!(Region::lookup(" Michoacan "), Some(Region::Michoacan));
        assert_eq!(Region::lookup("NUEVO LEÓN"), Some(Region::NuevoLeon));
        assert_eq!(Region::lookup(""), None);
        assert!("Atlantis".parse::<Region>().is_err());
    }

    #[test]
    fn place_suffix_names_the_region() {
        assert_eq!(
            Region::from_place("12 km al SUR de PINOTEPA NACIONAL, OAX"),
            Some(Region::Oaxaca)
        );
        assert_eq!(Region::from_place("Golfo de California"), None);
    }
}
