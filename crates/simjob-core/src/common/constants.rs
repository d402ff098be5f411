//! Unit conversion factors used when mapping XML output into result records.

const BOHR_SI: f64 = 0.529_177_208_59e-10;
const ANG_SI: f64 = 1.0e-10;
const RY_SI: f64 = 4.359_743_94 / 2.0 * 1.0e-18;
const HARTREE_SI: f64 = 2.0 * RY_SI;
const ELECTRONVOLT_SI: f64 = 1.602_176_487e-19;

pub const BOHR_TO_ANG: f64 = BOHR_SI / ANG_SI;
pub const HARTREE_TO_EV: f64 = HARTREE_SI / ELECTRONVOLT_SI;
pub const RY_TO_EV: f64 = RY_SI / ELECTRONVOLT_SI;

/// e/a0^2 to C/m^2 for electric polarization.
pub const E_BOHR2_TO_COULOMB_M2: f64 = 57.214_766;

pub const TWO_PI: f64 = 2.0 * std::f64::consts::PI;

#[cfg(test)]
mod tests {
    use super::{BOHR_TO_ANG, E_BOHR2_TO_COULOMB_M2, HARTREE_TO_EV, RY_TO_EV, TWO_PI};

    #[test]
    fn conversion_factors_match_expected_relationships() {
        assert!((BOHR_TO_ANG - 0.529_177_208_59).abs() <= 1.0e-15);
        assert!((HARTREE_TO_EV - 2.0 * RY_TO_EV).abs() <= 1.0e-12);
        assert!((HARTREE_TO_EV - 27.211_383_86).abs() <= 1.0e-6);
        assert!((TWO_PI - 6.283_185_307_179_586).abs() <= 1.0e-15);
        assert_eq!(E_BOHR2_TO_COULOMB_M2, 57.214_766);
    }
}
