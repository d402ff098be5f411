use super::{
    XmlDecodeError, XmlResult, attr, cell_volume, child, float_list, float_matrix, parse_scalar,
    require, text_f64, text_f64_list, text_i64, vector3,
};
use crate::common::constants::{BOHR_TO_ANG, HARTREE_TO_EV, TWO_PI};
use crate::domain::ResultRecord;
use crate::modules::logs::LogContainer;
use crate::modules::retrieved::RetrievedFiles;
use roxmltree::{Document, Node};
use serde_json::{Value, json};

pub fn decode_legacy(
    document: &Document<'_>,
    temporary: Option<&dyn RetrievedFiles>,
) -> XmlResult<(ResultRecord, LogContainer)> {
    let root = document.root_element();
    let mut logs = LogContainer::new();
    let mut record = ResultRecord::new();

    let format = require(root, "HEADER/FORMAT")?;
    let creator = require(root, "HEADER/CREATOR")?;
    record.insert("format_name".into(), json!(attr(format, "NAME")?));
    record.insert("format_version".into(), json!(attr(format, "VERSION")?));
    record.insert("creator_name".into(), json!(attr(creator, "NAME")?.to_lowercase()));
    record.insert("creator_version".into(), json!(attr(creator, "VERSION")?));

    let alat_bohr = text_f64(require(root, "CELL/LATTICE_PARAMETER")?)?;
    let alat_angstrom = alat_bohr * BOHR_TO_ANG;
    record.insert("structure".into(), decode_structure(root, alat_bohr)?);

    let band_info = require(root, "BAND_STRUCTURE_INFO")?;
    let num_bands = text_i64(require(band_info, "NUMBER_OF_BANDS")?)?;
    let num_k_points = text_i64(require(band_info, "NUMBER_OF_K-POINTS")?)?;
    record.insert("number_of_bands".into(), json!(num_bands));
    record.insert("number_of_k_points".into(), json!(num_k_points));
    record.insert(
        "number_of_electrons".into(),
        json!(text_f64(require(band_info, "NUMBER_OF_ELECTRONS")?)?),
    );
    if let Some(fermi_energy) = child(band_info, "FERMI_ENERGY") {
        record.insert("fermi_energy".into(), json!(text_f64(fermi_energy)? * HARTREE_TO_EV));
        record.insert("fermi_energy_units".into(), json!("eV"));
    }

    let mut k_points = Vec::new();
    let mut k_points_weights = Vec::new();
    if num_k_points < 0 {
        return Err(XmlDecodeError::Parse(format!(
            "negative number of k-points: {num_k_points}"
        )));
    }
    if let Some(eigenvalues) = child(root, "EIGENVALUES") {
        let nodes = k_point_nodes(eigenvalues)?;
        if nodes.len() as i64 != num_k_points {
            return Err(XmlDecodeError::Parse(format!(
                "NUMBER_OF_K-POINTS is {num_k_points} but EIGENVALUES holds {} k-points",
                nodes.len()
            )));
        }
        for k_point in nodes {
            let coordinates = text_f64_list(require(k_point, "K-POINT_COORDS")?)?;
            k_points.push(
                coordinates
                    .into_iter()
                    .map(|component| component * TWO_PI / alat_angstrom)
                    .collect::<Vec<_>>(),
            );
            k_points_weights.push(text_f64(require(k_point, "WEIGHT")?)?);
        }
    }
    if !k_points.is_empty() {
        record.insert("k_points".into(), float_matrix(&k_points));
        record.insert("k_points_weights".into(), float_list(&k_points_weights));
        record.insert("k_points_units".into(), json!("1 / angstrom"));
    }

    let bands = match temporary {
        Some(folder) => read_eigenvalue_files(folder, num_k_points, num_bands, &mut logs)?,
        None => None,
    };
    record.insert("lkpoint_dir".into(), json!(bands.is_some()));
    if let Some(bands) = bands {
        record.insert("bands".into(), bands);
    }

    Ok((record, logs))
}

/// `K-POINT.<n>` children of `EIGENVALUES`, ordered by `n`.
fn k_point_nodes<'a, 'input>(eigenvalues: Node<'a, 'input>) -> XmlResult<Vec<Node<'a, 'input>>> {
    let mut indexed = Vec::new();
    for node in eigenvalues.children().filter(Node::is_element) {
        if let Some(index) = node.tag_name().name().strip_prefix("K-POINT.") {
            indexed.push((parse_scalar::<u64>(index, "K-POINT index")?, node));
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, node)| node).collect())
}

fn decode_structure(root: Node<'_, '_>, alat_bohr: f64) -> XmlResult<Value> {
    let vectors = require(root, "CELL/DIRECT_LATTICE_VECTORS")?;
    let lattice_vectors = ["a1", "a2", "a3"]
        .iter()
        .map(|name| {
            let bohr = vector3(text_f64_list(require(vectors, name)?)?, name)?;
            Ok(bohr.map(|component| component * BOHR_TO_ANG))
        })
        .collect::<XmlResult<Vec<[f64; 3]>>>()?;
    let volume = cell_volume(&lattice_vectors[0], &lattice_vectors[1], &lattice_vectors[2]);
    let lattice_rows: Vec<Vec<f64>> = lattice_vectors.iter().map(|row| row.to_vec()).collect();

    let ions = require(root, "IONS")?;
    let number_of_atoms = text_i64(require(ions, "NUMBER_OF_ATOMS")?)?;
    let mut atoms = Vec::new();
    for index in 1..=number_of_atoms {
        let atom = require(ions, &format!("ATOM.{index}"))?;
        let tau: Vec<f64> = attr(atom, "tau")?
            .split_whitespace()
            .map(|token| parse_scalar::<f64>(token, "tau").map(|value| value * BOHR_TO_ANG))
            .collect::<XmlResult<_>>()?;
        atoms.push(json!([attr(atom, "SPECIES")?.trim(), float_list(&tau)]));
    }

    let mut structure = json!({
        "atomic_positions_units": "Angstrom",
        "direct_lattice_vectors_units": "Angstrom",
        "number_of_atoms": number_of_atoms,
        "lattice_parameter": alat_bohr * BOHR_TO_ANG,
        "lattice_parameter_xml": alat_bohr,
        "atoms": atoms.clone(),
        "cell": {
            "lattice_vectors": float_matrix(&lattice_rows),
            "volume": volume,
            "atoms": atoms,
        },
    });
    if let Some(species) = child(ions, "NUMBER_OF_SPECIES") {
        structure["number_of_species"] = json!(text_i64(species)?);
    }
    Ok(structure)
}

/// Reads `K<nnnnn>/eigenval.xml` for every k-point; a partial set is dropped
/// with a warning.
fn read_eigenvalue_files(
    folder: &dyn RetrievedFiles,
    num_k_points: i64,
    num_bands: i64,
    logs: &mut LogContainer,
) -> XmlResult<Option<Value>> {
    let names = folder.list_object_names();
    let available = names
        .iter()
        .filter(|name| name.ends_with("eigenval.xml"))
        .count();
    if available as i64 != num_k_points {
        if available > 0 {
            logs.warning(format!(
                "found {available} eigenvalue files for {num_k_points} k-points, band energies are not parsed"
            ));
        }
        return Ok(None);
    }
    let mut eigenvalues = Vec::new();
    let mut occupations = Vec::new();

    for index in 1..=num_k_points {
        let suffix = format!("K{index:05}/eigenval.xml");
        let Some(name) = names.iter().find(|name| name.ends_with(&suffix)) else {
            if index > 1 {
                logs.warning(format!(
                    "eigenvalue file {suffix} is missing, band energies are not parsed"
                ));
            }
            return Ok(None);
        };

        let bytes = folder.read_object(name)?;
        let source = std::str::from_utf8(&bytes).map_err(|source| {
            XmlDecodeError::Parse(format!("{name} is not valid UTF-8: {source}"))
        })?;
        let document =
            Document::parse(source).map_err(|source| XmlDecodeError::Parse(format!("{name}: {source}")))?;
        let root = document.root_element();

        let energies = text_f64_list(require(root, "EIGENVALUES")?)?;
        let occupied = text_f64_list(require(root, "OCCUPATIONS")?)?;
        if energies.len() as i64 != num_bands || occupied.len() as i64 != num_bands {
            return Err(XmlDecodeError::Unexpected(format!(
                "{name} holds {} eigenvalues and {} occupations, expected {num_bands}",
                energies.len(),
                occupied.len()
            )));
        }
        eigenvalues.push(
            energies
                .into_iter()
                .map(|energy| energy * HARTREE_TO_EV)
                .collect::<Vec<_>>(),
        );
        occupations.push(occupied);
    }

    Ok(Some(json!({
        "bands": [float_matrix(&eigenvalues)],
        "occupations": [float_matrix(&occupations)],
        "bands_units": "eV",
    })))
}

#[cfg(test)]
mod tests {
    use super::decode_legacy;
    use crate::common::constants::{BOHR_TO_ANG, HARTREE_TO_EV};
    use crate::modules::logs::LogSeverity;
    use crate::modules::output::xml::XmlDecodeError;
    use crate::modules::retrieved::InMemoryRetrieved;
    use roxmltree::Document;

    const DATA_FILE: &str = r#"<?xml version="1.0"?>
<Root>
  <HEADER>
    <FORMAT NAME="QEXML" VERSION="1.4.0"/>
    <CREATOR NAME="PWSCF" VERSION="5.0.2"/>
  </HEADER>
  <CELL>
    <LATTICE_PARAMETER type="real" size="1" UNITS="Bohr">1.0d1</LATTICE_PARAMETER>
    <DIRECT_LATTICE_VECTORS>
      <UNITS_FOR_DIRECT_LATTICE_VECTORS UNITS="Bohr"/>
      <a1 type="real" size="3" columns="3">10.0 0.0 0.0</a1>
      <a2 type="real" size="3" columns="3">0.0 10.0 0.0</a2>
      <a3 type="real" size="3" columns="3">0.0 0.0 10.0</a3>
    </DIRECT_LATTICE_VECTORS>
  </CELL>
  <IONS>
    <NUMBER_OF_ATOMS type="integer" size="1">1</NUMBER_OF_ATOMS>
    <NUMBER_OF_SPECIES type="integer" size="1">1</NUMBER_OF_SPECIES>
    <ATOM.1 SPECIES="Li " INDEX="1" tau="0.0 0.0 1.0" if_pos="1 1 1"/>
  </IONS>
  <BAND_STRUCTURE_INFO>
    <NUMBER_OF_K-POINTS type="integer" size="1">1</NUMBER_OF_K-POINTS>
    <NUMBER_OF_BANDS type="integer" size="1">2</NUMBER_OF_BANDS>
    <NUMBER_OF_ELECTRONS type="real" size="1">3.0</NUMBER_OF_ELECTRONS>
    <FERMI_ENERGY type="real" size="1">0.1</FERMI_ENERGY>
  </BAND_STRUCTURE_INFO>
  <EIGENVALUES>
    <K-POINT.1>
      <K-POINT_COORDS type="real" size="3">0.0 0.0 0.5</K-POINT_COORDS>
      <WEIGHT type="real" size="1">2.0</WEIGHT>
    </K-POINT.1>
  </EIGENVALUES>
</Root>"#;

    const EIGENVAL: &str = r#"<Root>
  <UNITS_FOR_ENERGIES UNITS="Hartree"/>
  <EIGENVALUES type="real" size="2">-0.2 0.3</EIGENVALUES>
  <OCCUPATIONS type="real" size="2">1.0 0.0</OCCUPATIONS>
</Root>"#;

    #[test]
    fn decodes_header_cell_and_band_info() {
        let document = Document::parse(DATA_FILE).expect("fixture should parse");
        let (record, logs) = decode_legacy(&document, None).expect("document should decode");

        assert!(logs.is_empty());
        assert_eq!(record["format_name"], "QEXML");
        assert_eq!(record["creator_name"], "pwscf");
        assert_eq!(record["number_of_bands"], 2);
        assert_eq!(record["lkpoint_dir"], false);
        assert!(!record.contains_key("bands"));

        let fermi = record["fermi_energy"].as_f64().expect("fermi energy");
        assert!((fermi - 0.1 * HARTREE_TO_EV).abs() < 1e-9);

        let structure = &record["structure"];
        assert_eq!(structure["atoms"][0][0], "Li");
        let z = structure["atoms"][0][1][2].as_f64().expect("z coordinate");
        assert!((z - BOHR_TO_ANG).abs() < 1e-12);
        let volume = structure["cell"]["volume"].as_f64().expect("volume");
        assert!((volume - 1000.0 * BOHR_TO_ANG.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn eigenvalues_are_read_from_the_temporary_folder() {
        let document = Document::parse(DATA_FILE).expect("fixture should parse");
        let temporary = InMemoryRetrieved::new().with_object("K00001/eigenval.xml", EIGENVAL);
        let (record, _) =
            decode_legacy(&document, Some(&temporary)).expect("document should decode");

        assert_eq!(record["lkpoint_dir"], true);
        let lowest = record["bands"]["bands"][0][0][0].as_f64().expect("eigenvalue");
        assert!((lowest + 0.2 * HARTREE_TO_EV).abs() < 1e-9);
        assert_eq!(record["bands"]["occupations"][0][0], serde_json::json!([1.0, 0.0]));
    }

    #[test]
    fn eigenvalue_count_mismatch_is_unexpected() {
        let document = Document::parse(DATA_FILE).expect("fixture should parse");
        let temporary = InMemoryRetrieved::new().with_object(
            "K00001/eigenval.xml",
            EIGENVAL.replace("-0.2 0.3", "-0.2"),
        );
        let error = decode_legacy(&document, Some(&temporary))
            .expect_err("short eigenvalue list should fail");
        assert!(matches!(error, XmlDecodeError::Unexpected(_)));
    }

    #[test]
    fn k_point_count_must_match_the_listed_entries() {
        let inflated = DATA_FILE.replace(
            "size=\"1\">1</NUMBER_OF_K-POINTS>",
            "size=\"1\">200000000</NUMBER_OF_K-POINTS>",
        );
        let document = Document::parse(&inflated).expect("fixture should parse");
        let temporary = InMemoryRetrieved::new().with_object("K00001/eigenval.xml", EIGENVAL);
        let error = decode_legacy(&document, Some(&temporary))
            .expect_err("inflated k-point count should fail");
        assert!(matches!(error, XmlDecodeError::Parse(message) if message.contains("200000000")));

        let negative = DATA_FILE.replace(
            "size=\"1\">1</NUMBER_OF_K-POINTS>",
            "size=\"1\">-1</NUMBER_OF_K-POINTS>",
        );
        let document = Document::parse(&negative).expect("fixture should parse");
        let error = decode_legacy(&document, None).expect_err("negative count should fail");
        assert!(matches!(error, XmlDecodeError::Parse(_)));
    }

    #[test]
    fn eigenvalue_files_are_skipped_when_the_set_is_incomplete() {
        let two_points = DATA_FILE
            .replace(
                "size=\"1\">1</NUMBER_OF_K-POINTS>",
                "size=\"1\">2</NUMBER_OF_K-POINTS>",
            )
            .replace(
                "</K-POINT.1>",
                "</K-POINT.1>\n    <K-POINT.2>\n      <K-POINT_COORDS>0.0 0.5 0.5</K-POINT_COORDS>\n      <WEIGHT>1.0</WEIGHT>\n    </K-POINT.2>",
            );
        let document = Document::parse(&two_points).expect("fixture should parse");
        let temporary = InMemoryRetrieved::new().with_object("K00001/eigenval.xml", EIGENVAL);
        let (record, logs) =
            decode_legacy(&document, Some(&temporary)).expect("document should decode");

        assert_eq!(record["lkpoint_dir"], false);
        assert_eq!(record["k_points_weights"], serde_json::json!([2.0, 1.0]));
        assert_eq!(logs.messages(LogSeverity::Warning).count(), 1);
    }

    #[test]
    fn missing_ions_block_is_a_parse_error() {
        let source = DATA_FILE.replace("<IONS>", "<IONS_>").replace("</IONS>", "</IONS_>");
        let document = Document::parse(&source).expect("fixture should parse");
        let error = decode_legacy(&document, None).expect_err("missing ions should fail");
        assert!(matches!(error, XmlDecodeError::Parse(_)));
    }
}
