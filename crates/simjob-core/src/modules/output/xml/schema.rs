use super::{
    XmlDecodeError, XmlResult, attr, attr_f64, attr_i64, cell_volume, child, children, descend,
    float_list, float_matrix, optional_child_bool, optional_child_f64, optional_child_i64,
    optional_child_text, parse_bool, require, text, text_bool, text_f64, text_f64_list,
    text_i64, text_i64_list, vector3, version_less_than,
};
use crate::common::constants::{
    BOHR_TO_ANG, E_BOHR2_TO_COULOMB_M2, HARTREE_TO_EV, RY_TO_EV, TWO_PI,
};
use crate::domain::ResultRecord;
use crate::modules::logs::LogContainer;
use roxmltree::{Document, Node};
use serde_json::{Map, Value, json};

/// Format versions before this one wrote `degauss` in Ry instead of Hartree.
const DEGAUSS_HARTREE_SINCE: &str = "19.03.04";

pub fn decode_schema_based(document: &Document<'_>) -> XmlResult<(ResultRecord, LogContainer)> {
    let root = document.root_element();
    let mut logs = LogContainer::new();
    let mut record = ResultRecord::new();

    let xml_format = require(root, "general_info/xml_format")?;
    let creator = require(root, "general_info/creator")?;
    let format_version = attr(xml_format, "VERSION")?.to_string();

    let input = child(root, "input");
    let output = require(root, "output")?;
    let in_input = |path: &str| input.and_then(|node| descend(node, path));

    let atomic_structure = require(output, "atomic_structure")?;
    let alat_bohr = attr_f64(atomic_structure, "alat")?;
    let alat_angstrom = alat_bohr * BOHR_TO_ANG;

    let species_node = require(output, "atomic_species")?;
    let species: Vec<Node<'_, '_>> = children(species_node, "species").collect();
    let mut starting_magnetization = Vec::with_capacity(species.len());
    let mut magnetization_angle1 = Vec::with_capacity(species.len());
    let mut magnetization_angle2 = Vec::with_capacity(species.len());
    for specie in &species {
        starting_magnetization
            .push(optional_child_f64(*specie, "starting_magnetization")?.unwrap_or(0.0));
        magnetization_angle1.push(optional_child_f64(*specie, "magnetization_angle1")?.unwrap_or(0.0));
        magnetization_angle2.push(optional_child_f64(*specie, "magnetization_angle2")?.unwrap_or(0.0));
    }

    let constraint_mag = match in_input("spin_constraints/spin_constraints").map(text) {
        Some("atomic") => 1,
        Some("atomic direction") => 2,
        Some("total") => 3,
        Some("total direction") => 6,
        _ => 0,
    };

    let lsda = in_input("spin/lsda").map(text_bool).transpose()?.unwrap_or(false);
    let spin_orbit_calculation = in_input("spin/spinorbit")
        .map(text_bool)
        .transpose()?
        .unwrap_or(false);
    let magnetization = require(output, "magnetization")?;
    let non_colinear_calculation = text_bool(require(magnetization, "noncolin")?)?;
    let do_magnetization = optional_child_bool(magnetization, "do_magnetization")?.unwrap_or(false);
    let time_reversal = !(non_colinear_calculation && do_magnetization);
    let nspin = if non_colinear_calculation || spin_orbit_calculation {
        4
    } else if lsda {
        2
    } else {
        1
    };

    let symmetry_block = decode_symmetries(output, &mut logs)?;

    let basis_set = require(output, "basis_set")?;
    let algorithmic_info = require(output, "algorithmic_info")?;
    let electric_field = in_input("electric_field");
    let has_electric_field = electric_field
        .and_then(|node| child(node, "electric_potential"))
        .is_some_and(|node| text(node) == "sawtooth_potential");
    let has_dipole_correction = match electric_field {
        Some(node) => optional_child_bool(node, "dipole_correction")?.unwrap_or(false),
        None => false,
    };
    let wfc_cutoff = in_input("basis/ecutwfc").map(text_f64).transpose()?.unwrap_or(-1.0);

    record.insert("lkpoint_dir".into(), json!(false));
    record.insert("charge_density".into(), json!("./charge-density.dat"));
    record.insert("rho_cutoff_units".into(), json!("eV"));
    record.insert("wfc_cutoff_units".into(), json!("eV"));
    record.insert("fermi_energy_units".into(), json!("eV"));
    record.insert("k_points_units".into(), json!("1 / angstrom"));
    record.insert("symmetries_units".into(), json!("crystal"));
    record.insert("constraint_mag".into(), json!(constraint_mag));
    record.insert("magnetization_angle1".into(), float_list(&magnetization_angle1));
    record.insert("magnetization_angle2".into(), float_list(&magnetization_angle2));
    record.insert("starting_magnetization".into(), float_list(&starting_magnetization));
    record.insert("has_electric_field".into(), json!(has_electric_field));
    record.insert("has_dipole_correction".into(), json!(has_dipole_correction));
    record.insert("lda_plus_u_calculation".into(), json!(child(output, "dftU").is_some()));
    record.insert("format_name".into(), json!(attr(xml_format, "NAME")?));
    record.insert("format_version".into(), json!(format_version));
    record.insert("creator_name".into(), json!(attr(creator, "NAME")?.to_lowercase()));
    record.insert("creator_version".into(), json!(attr(creator, "VERSION")?));
    record.insert("non_colinear_calculation".into(), json!(non_colinear_calculation));
    record.insert("do_magnetization".into(), json!(do_magnetization));
    record.insert("time_reversal_flag".into(), json!(time_reversal));
    record.insert("symmetries".into(), Value::Array(symmetry_block.crystal));
    record.insert("lattice_symmetries".into(), Value::Array(symmetry_block.lattice));
    record.insert("inversion_symmetry".into(), json!(symmetry_block.inversion));
    record.insert("number_of_symmetries".into(), json!(symmetry_block.nsym));
    record.insert("number_of_bravais_symmetries".into(), json!(symmetry_block.nrot));
    record.insert(
        "do_not_use_time_reversal".into(),
        json!(in_input("symmetry_flags/noinv").map(text_bool).transpose()?),
    );
    record.insert(
        "no_time_rev_operations".into(),
        json!(in_input("symmetry_flags/no_t_rev").map(text_bool).transpose()?),
    );
    record.insert("spin_orbit_domag".into(), json!(do_magnetization));
    record.insert("fft_grid".into(), json!(fft_dimensions(require(basis_set, "fft_grid")?)?));
    record.insert(
        "smooth_fft_grid".into(),
        json!(fft_dimensions(require(basis_set, "fft_smooth")?)?),
    );
    record.insert("lsda".into(), json!(lsda));
    record.insert("number_of_spin_components".into(), json!(nspin));
    record.insert("wfc_cutoff".into(), json!(wfc_cutoff * HARTREE_TO_EV));
    record.insert(
        "rho_cutoff".into(),
        json!(text_f64(require(basis_set, "ecutrho")?)? * HARTREE_TO_EV),
    );
    record.insert(
        "dft_exchange_correlation".into(),
        json!(in_input("dft/functional").map(|node| text(node).to_string())),
    );
    record.insert("spin_orbit_calculation".into(), json!(spin_orbit_calculation));
    record.insert(
        "q_real_space".into(),
        json!(text_bool(require(algorithmic_info, "real_space_q")?)?),
    );

    if let Some(band_structure) = child(output, "band_structure") {
        let smearing = child(band_structure, "smearing").or_else(|| in_input("smearing"));
        if let Some(smearing) = smearing {
            let degauss = attr_f64(smearing, "degauss")?;
            let degauss = if version_less_than(&format_version, DEGAUSS_HARTREE_SINCE) {
                degauss * RY_TO_EV
            } else {
                degauss * HARTREE_TO_EV
            };
            record.insert("degauss".into(), json!(degauss));
            record.insert("smearing_type".into(), json!(text(smearing)));
        }
        decode_band_structure(band_structure, alat_angstrom, &mut record)?;
    }

    if let Some(monkhorst_pack) = in_input("k_points_IBZ/monkhorst_pack") {
        let grid = ["nk1", "nk2", "nk3"]
            .iter()
            .map(|name| attr_i64(monkhorst_pack, name))
            .collect::<XmlResult<Vec<_>>>()?;
        let offset = ["k1", "k2", "k3"]
            .iter()
            .map(|name| attr_i64(monkhorst_pack, name))
            .collect::<XmlResult<Vec<_>>>()?;
        record.insert("monkhorst_pack_grid".into(), json!(grid));
        record.insert("monkhorst_pack_offset".into(), json!(offset));
    }

    if let Some(occupations) = in_input("bands/occupations") {
        record.insert("occupations".into(), json!(text(occupations)));
    }

    if let Some(assume_isolated) = optional_child_text(output, "boundary_conditions/assume_isolated") {
        record.insert("assume_isolated".into(), json!(assume_isolated));
    }

    if let Some(beta) = optional_child_bool(algorithmic_info, "real_space_beta")? {
        record.insert("beta_real_space".into(), json!(beta));
    }

    if let Some(convergence_info) = decode_convergence_info(output)? {
        record.insert("convergence_info".into(), convergence_info);
    }

    if let Some(status) = optional_child_i64(root, "status")? {
        record.insert("exit_status".into(), json!(status));
    }

    if let Some(berry_phase) = descend(output, "electric_field/BerryPhase") {
        decode_berry_phase(berry_phase, &mut record)?;
    }

    record.insert(
        "structure".into(),
        decode_structure(atomic_structure, species_node, &species, basis_set, alat_bohr)?,
    );

    Ok((record, logs))
}

struct SymmetryBlock {
    crystal: Vec<Value>,
    lattice: Vec<Value>,
    inversion: bool,
    nsym: Option<i64>,
    nrot: Option<i64>,
}

fn decode_symmetries(output: Node<'_, '_>, logs: &mut LogContainer) -> XmlResult<SymmetryBlock> {
    let mut block = SymmetryBlock {
        crystal: Vec::new(),
        lattice: Vec::new(),
        inversion: false,
        nsym: None,
        nrot: None,
    };

    if let Some(symmetries) = child(output, "symmetries") {
        block.nsym = optional_child_i64(symmetries, "nsym")?;
        block.nrot = optional_child_i64(symmetries, "nrot")?;

        for symmetry in children(symmetries, "symmetry") {
            let info = require(symmetry, "info")?;
            let symmetry_type = text(info);
            let name = attr(info, "name")?;
            if symmetry_type == "crystal_symmetry" && name.eq_ignore_ascii_case("inversion") {
                block.inversion = true;
            }

            let rotation = text_f64_list(require(symmetry, "rotation")?)?;
            if rotation.len() != 9 {
                return Err(XmlDecodeError::Unexpected(format!(
                    "rotation of symmetry '{name}' has {} elements instead of 9",
                    rotation.len()
                )));
            }
            let rows: Vec<Vec<f64>> = rotation.chunks(3).map(<[f64]>::to_vec).collect();

            let time_reversal = match info.attribute("time_reversal") {
                Some(raw) => parse_bool(raw, "time_reversal")?,
                None => false,
            };

            let mut entry = Map::new();
            entry.insert("rotation".into(), float_matrix(&rows));
            entry.insert("name".into(), json!(name));
            entry.insert("t_rev".into(), json!(if time_reversal { "1" } else { "0" }));
            if let Some(equivalent_atoms) = child(symmetry, "equivalent_atoms") {
                entry.insert("equivalent_atoms".into(), json!(text_i64_list(equivalent_atoms)?));
            }
            if let Some(translation) = child(symmetry, "fractional_translation") {
                entry.insert(
                    "fractional_translation".into(),
                    float_list(&text_f64_list(translation)?),
                );
            }

            match symmetry_type {
                "crystal_symmetry" => block.crystal.push(Value::Object(entry)),
                "lattice_symmetry" => block.lattice.push(Value::Object(entry)),
                other => {
                    return Err(XmlDecodeError::Parse(format!(
                        "unexpected type of symmetry: {other}"
                    )));
                }
            }
        }
    }

    let crystal = block.crystal.len() as i64;
    let lattice = block.lattice.len() as i64;
    if block.nsym != Some(crystal) || block.nrot != Some(crystal + lattice) {
        logs.warning(format!(
            "Inconsistent number of symmetries: nsym={}, nrot={}, len(symmetries)={crystal}, len(lattice_symmetries)={lattice}",
            display_count(block.nsym),
            display_count(block.nrot),
        ));
    }

    Ok(block)
}

fn display_count(count: Option<i64>) -> String {
    count.map_or_else(|| "None".to_string(), |value| value.to_string())
}

fn fft_dimensions(node: Node<'_, '_>) -> XmlResult<Vec<i64>> {
    ["nr1", "nr2", "nr3"]
        .iter()
        .map(|name| attr_i64(node, name))
        .collect()
}

fn decode_band_structure(
    band_structure: Node<'_, '_>,
    alat_angstrom: f64,
    record: &mut ResultRecord,
) -> XmlResult<()> {
    let num_k_points = text_i64(require(band_structure, "nks")?)?;
    let num_electrons = text_f64(require(band_structure, "nelec")?)?;
    let num_atomic_wfc = text_i64(require(band_structure, "num_of_atomic_wfc")?)?;
    let nbnd = optional_child_i64(band_structure, "nbnd")?;
    let nbnd_up = optional_child_i64(band_structure, "nbnd_up")?;
    let nbnd_dw = optional_child_i64(band_structure, "nbnd_dw")?;

    let (spins, num_bands) = match (nbnd, nbnd_up, nbnd_dw) {
        (None, None, None) => {
            return Err(XmlDecodeError::Parse(
                "none of `nbnd`, `nbnd_up` or `nbnd_dw` could be parsed".to_string(),
            ));
        }
        (Some(total), None, None) => (false, total),
        (_, Some(_), None) | (_, None, Some(_)) => {
            return Err(XmlDecodeError::Parse(
                "only one of `nbnd_up` and `nbnd_dw` could be parsed".to_string(),
            ));
        }
        (total, Some(up), Some(down)) => {
            if up != down {
                return Err(XmlDecodeError::Parse(format!(
                    "different number of bands for spin channels: {up} and {down}"
                )));
            }
            if let Some(total) = total.filter(|total| *total != up + down) {
                return Err(XmlDecodeError::Parse(format!(
                    "inconsistent number of bands: nbnd={total}, nbnd_up={up}, nbnd_down={down}"
                )));
            }
            (true, total.unwrap_or(up + down))
        }
    };

    let mut k_points = Vec::new();
    let mut k_points_weights = Vec::new();
    let channels = if spins { 2 } else { 1 };
    let mut eigenvalues: Vec<Vec<Vec<f64>>> = vec![Vec::new(); channels];
    let mut occupations: Vec<Vec<Vec<f64>>> = vec![Vec::new(); channels];

    let per_channel = if spins { num_bands / 2 } else { num_bands };
    let per_channel = usize::try_from(per_channel)
        .map_err(|_| XmlDecodeError::Parse(format!("negative number of bands: {num_bands}")))?;

    for ks_state in children(band_structure, "ks_energies") {
        let k_point = require(ks_state, "k_point")?;
        k_points.push(
            text_f64_list(k_point)?
                .into_iter()
                .map(|component| component * TWO_PI / alat_angstrom)
                .collect::<Vec<_>>(),
        );
        k_points_weights.push(attr_f64(k_point, "weight")?);

        let state_eigenvalues = text_f64_list(require(ks_state, "eigenvalues")?)?;
        let state_occupations = text_f64_list(require(ks_state, "occupations")?)?;
        let expected = channels * per_channel;
        if state_eigenvalues.len() != expected || state_occupations.len() != expected {
            return Err(unexpected_shape(channels, num_k_points, per_channel));
        }
        for channel in 0..channels {
            let range = channel * per_channel..(channel + 1) * per_channel;
            let (Some(energies), Some(occupied)) = (
                state_eigenvalues.get(range.clone()),
                state_occupations.get(range),
            ) else {
                return Err(unexpected_shape(channels, num_k_points, per_channel));
            };
            eigenvalues[channel].push(energies.iter().map(|value| value * HARTREE_TO_EV).collect());
            occupations[channel].push(occupied.to_vec());
        }
    }

    if k_points.len() as i64 != num_k_points {
        return Err(unexpected_shape(channels, num_k_points, per_channel));
    }

    let number_of_bands = if spins { num_bands / 2 } else { num_bands };
    record.insert("number_of_bands".into(), json!(number_of_bands));
    if let Some(up) = nbnd_up {
        record.insert("number_of_bands_up".into(), json!(up));
    }
    if let Some(down) = nbnd_dw {
        record.insert("number_of_bands_down".into(), json!(down));
    }

    if let Some(fermi_energy) = optional_child_f64(band_structure, "fermi_energy")? {
        record.insert("fermi_energy".into(), json!(fermi_energy * HARTREE_TO_EV));
    }
    if let Some(two_fermi_energies) = child(band_structure, "two_fermi_energies") {
        let energies = text_f64_list(two_fermi_energies)?;
        let [up, down] = <[f64; 2]>::try_from(energies).map_err(|energies: Vec<f64>| {
            XmlDecodeError::Unexpected(format!(
                "expected two Fermi energies, got {}",
                energies.len()
            ))
        })?;
        record.insert("fermi_energy_up".into(), json!(up * HARTREE_TO_EV));
        record.insert("fermi_energy_down".into(), json!(down * HARTREE_TO_EV));
    }

    record.insert("number_of_atomic_wfc".into(), json!(num_atomic_wfc));
    record.insert("number_of_k_points".into(), json!(num_k_points));
    record.insert("number_of_electrons".into(), json!(num_electrons));
    record.insert("k_points".into(), float_matrix(&k_points));
    record.insert("k_points_weights".into(), float_list(&k_points_weights));
    record.insert(
        "bands".into(),
        json!({
            "occupations": occupations.iter().map(|channel| float_matrix(channel)).collect::<Vec<_>>(),
            "bands": eigenvalues.iter().map(|channel| float_matrix(channel)).collect::<Vec<_>>(),
            "bands_units": "eV",
        }),
    );
    Ok(())
}

fn unexpected_shape(channels: usize, num_k_points: i64, per_channel: usize) -> XmlDecodeError {
    XmlDecodeError::Unexpected(format!(
        "unexpected shape of band_eigenvalues, expected ({channels}, {num_k_points}, {per_channel})"
    ))
}

fn decode_convergence_info(output: Node<'_, '_>) -> XmlResult<Option<Value>> {
    let Some(convergence) = child(output, "convergence_info") else {
        return Ok(None);
    };

    let mut info = Map::new();
    for (section, keys) in [
        ("scf_conv", ["convergence_achieved", "n_scf_steps", "scf_error"]),
        ("opt_conv", ["convergence_achieved", "n_opt_steps", "grad_norm"]),
    ] {
        let Some(node) = child(convergence, section) else {
            continue;
        };
        let mut values = Map::new();
        for key in keys {
            let Some(value_node) = child(node, key) else {
                continue;
            };
            let value = match key {
                "convergence_achieved" => json!(text_bool(value_node)?),
                "n_scf_steps" | "n_opt_steps" => json!(text_i64(value_node)?),
                _ => json!(text_f64(value_node)?),
            };
            values.insert(key.to_string(), value);
        }
        if !values.is_empty() {
            info.insert(section.to_string(), Value::Object(values));
        }
    }

    Ok((!info.is_empty()).then_some(Value::Object(info)))
}

fn decode_berry_phase(berry_phase: Node<'_, '_>, record: &mut ResultRecord) -> XmlResult<()> {
    let polarization_node = require(berry_phase, "totalPolarization/polarization")?;
    let units = attr(polarization_node, "Units")?;
    let mut polarization = text_f64(polarization_node)?;
    let mut modulus = text_f64(require(berry_phase, "totalPolarization/modulus")?)?;
    match units {
        "e/bohr^2" => {
            polarization *= E_BOHR2_TO_COULOMB_M2;
            modulus *= E_BOHR2_TO_COULOMB_M2;
        }
        "C/m^2" => {}
        other => {
            return Err(XmlDecodeError::Unexpected(format!(
                "unsupported units '{other}' of total polarization"
            )));
        }
    }
    let direction = text_f64_list(require(berry_phase, "totalPolarization/direction")?)?;
    let total_phase = require(berry_phase, "totalPhase")?;

    record.insert("total_phase".into(), json!(text_f64(total_phase)?));
    record.insert("total_phase_units".into(), json!("2pi"));
    record.insert("ionic_phase".into(), json!(attr_f64(total_phase, "ionic")?));
    record.insert("ionic_phase_units".into(), json!("2pi"));
    record.insert("electronic_phase".into(), json!(attr_f64(total_phase, "electronic")?));
    record.insert("electronic_phase_units".into(), json!("2pi"));
    record.insert("polarization".into(), json!(polarization));
    record.insert("polarization_module".into(), json!(modulus));
    record.insert("polarization_units".into(), json!("C / m^2"));
    record.insert("polarization_direction".into(), float_list(&direction));
    Ok(())
}

fn decode_structure(
    atomic_structure: Node<'_, '_>,
    species_node: Node<'_, '_>,
    species: &[Node<'_, '_>],
    basis_set: Node<'_, '_>,
    alat_bohr: f64,
) -> XmlResult<Value> {
    let lattice_vectors = ["cell/a1", "cell/a2", "cell/a3"]
        .iter()
        .map(|path| {
            let bohr = vector3(text_f64_list(require(atomic_structure, path)?)?, path)?;
            Ok(bohr.map(|component| component * BOHR_TO_ANG))
        })
        .collect::<XmlResult<Vec<[f64; 3]>>>()?;
    let volume = cell_volume(&lattice_vectors[0], &lattice_vectors[1], &lattice_vectors[2]);
    let lattice_rows: Vec<Vec<f64>> = lattice_vectors.iter().map(|row| row.to_vec()).collect();

    let atoms = children(require(atomic_structure, "atomic_positions")?, "atom")
        .map(|atom| {
            let position: Vec<f64> = text_f64_list(atom)?
                .into_iter()
                .map(|coordinate| coordinate * BOHR_TO_ANG)
                .collect();
            Ok(json!([attr(atom, "name")?, float_list(&position)]))
        })
        .collect::<XmlResult<Vec<Value>>>()?;

    let reciprocal = ["reciprocal_lattice/b1", "reciprocal_lattice/b2", "reciprocal_lattice/b3"]
        .iter()
        .map(|path| text_f64_list(require(basis_set, path)?))
        .collect::<XmlResult<Vec<Vec<f64>>>>()?;

    let masses = species
        .iter()
        .map(|specie| optional_child_f64(*specie, "mass"))
        .collect::<XmlResult<Vec<Option<f64>>>>()?;
    let pseudos: Vec<Option<String>> = species
        .iter()
        .map(|specie| optional_child_text(*specie, "pseudo_file"))
        .collect();
    let types = species
        .iter()
        .map(|specie| attr(*specie, "name"))
        .collect::<XmlResult<Vec<&str>>>()?;

    Ok(json!({
        "atomic_positions_units": "Angstrom",
        "direct_lattice_vectors_units": "Angstrom",
        "number_of_atoms": attr_i64(atomic_structure, "nat")?,
        "lattice_parameter": alat_bohr * BOHR_TO_ANG,
        "reciprocal_lattice_vectors": float_matrix(&reciprocal),
        "atoms": atoms.clone(),
        "cell": {
            "lattice_vectors": float_matrix(&lattice_rows),
            "volume": volume,
            "atoms": atoms,
        },
        "lattice_parameter_xml": alat_bohr,
        "number_of_species": attr_i64(species_node, "ntyp")?,
        "species": {
            "index": (1..=species.len()).collect::<Vec<_>>(),
            "pseudo": pseudos,
            "mass": masses,
            "type": types,
        },
    }))
}
