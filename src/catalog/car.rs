// 🚗 Car catalog - game car-model id -> display label
//
// Unknown ids are not an error. They get UNKNOWN_CAR_LABEL for display and
// keep their raw numeric id everywhere else, so a later catalog update can
// reconcile them.

/// Label shown for any model id missing from the table
pub const UNKNOWN_CAR_LABEL: &str = "1996 Toyota Corolla";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarModel {
    pub id: u32,
    pub name: &'static str,
    pub year: u16,
}

impl CarModel {
    pub fn label(&self) -> String {
        format!("{} {}", self.name, self.year)
    }
}

const fn car(id: u32, name: &'static str, year: u16) -> CarModel {
    CarModel { id, name, year }
}

pub const CAR_MODELS: &[CarModel] = &[
    // GT3
    car(0, "Porsche 991 GT3 R", 2018),
    car(1, "Mercedes-AMG GT3", 2015),
    car(2, "Ferrari 488 GT3", 2018),
    car(3, "Audi R8 LMS", 2015),
    car(4, "Lamborghini Huracan GT3", 2015),
    car(5, "McLaren 650S GT3", 2015),
    car(6, "Nissan GT-R Nismo GT3", 2018),
    car(7, "BMW M6 GT3", 2017),
    car(8, "Bentley Continental GT3", 2018),
    car(10, "Nissan GT-R Nismo GT3", 2015),
    car(11, "Bentley Continental GT3", 2015),
    car(12, "AMR V12 Vantage GT3", 2013),
    car(13, "Reiter Engineering R-EX GT3", 2017),
    car(14, "Emil Frey Jaguar G3", 2012),
    car(15, "Lexus RC F GT3", 2016),
    car(16, "Lamborghini Huracan GT3 Evo", 2019),
    car(17, "Honda NSX GT3", 2017),
    car(19, "Audi R8 LMS Evo", 2019),
    car(20, "AMR V8 Vantage GT3", 2019),
    car(21, "Honda NSX GT3 Evo", 2019),
    car(22, "McLaren 720S GT3", 2019),
    car(23, "Porsche 991 II GT3 R", 2019),
    car(24, "Ferrari 488 GT3 Evo", 2020),
    car(25, "Mercedes-AMG GT3", 2020),
    car(30, "BMW M4 GT3", 2021),
    car(31, "Audi R8 LMS GT3 Evo II", 2022),
    car(32, "Ferrari 296 GT3", 2023),
    car(33, "Lamborghini Huracan GT3 Evo2", 2023),
    car(34, "Porsche 992 GT3 R", 2023),
    car(35, "McLaren 720S GT3 Evo", 2023),
    car(36, "Ford Mustang GT3", 2024),
    // Cup / Super Trofeo / Challenge
    car(9, "Porsche 991 II GT3 Cup", 2017),
    car(18, "Lamborghini Huracan Super Trofeo", 2015),
    car(26, "Ferrari 488 Challenge Evo", 2020),
    car(27, "BMW M2 CS Racing", 2020),
    car(28, "Porsche 992 GT3 Cup", 2021),
    car(29, "Lamborghini Huracan Super Trofeo Evo2", 2021),
    // GT4
    car(50, "Alpine A110 GT4", 2018),
    car(51, "AMR V8 Vantage GT4", 2018),
    car(52, "Audi R8 LMS GT4", 2018),
    car(53, "BMW M4 GT4", 2018),
    car(55, "Chevrolet Camaro GT4", 2017),
    car(56, "Ginetta G55 GT4", 2012),
    car(57, "KTM X-Bow GT4", 2016),
    car(58, "Maserati MC GT4", 2016),
    car(59, "McLaren 570S GT4", 2016),
    car(60, "Mercedes-AMG GT4", 2016),
    car(61, "Porsche 718 Cayman GT4 Clubsport", 2019),
];

pub fn lookup(id: u32) -> Option<&'static CarModel> {
    CAR_MODELS.iter().find(|model| model.id == id)
}

/// Display label for a model id, falling back to UNKNOWN_CAR_LABEL
pub fn car_label(id: u32) -> String {
    match lookup(id) {
        Some(model) => model.label(),
        None => UNKNOWN_CAR_LABEL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_label() {
        assert_eq!(car_label(22), "McLaren 720S GT3 2019");
        assert_eq!(car_label(61), "Porsche 718 Cayman GT4 Clubsport 2019");
    }

    #[test]
    fn test_unknown_falls_back() {
        assert_eq!(car_label(999), UNKNOWN_CAR_LABEL);
        assert!(lookup(54).is_none());
    }

    #[test]
    fn test_ids_unique() {
        let ids: HashSet<u32> = CAR_MODELS.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), CAR_MODELS.len());
    }
}
