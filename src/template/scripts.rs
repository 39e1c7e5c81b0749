//! Input scripts for the auxiliary tools.
//!
//! The structure builder, mass repartitioner, reimaging tool and frame dumper
//! each take a small script; these are rendered here from typed arguments.

use std::path::Path;

use serde::Serialize;
use tera::{Context, Tera};

use crate::error::TemplateError;

const LEAP_TEMPLATE: &str = r#"source leaprc.ff14SB
loadAmberParams frcmod.ionsjc_tip3p
mol = loadpdb "{{ pdb }}"
solvatebox mol TIP3PBOX {{ padding }}
addions mol Na+ 0
addions mol Cl- 0
saveamberparm mol {{ topology }} {{ coordinates }}
quit
"#;

const REPARTITION_TEMPLATE: &str = r#"setOverwrite true
HMassRepartition {{ hydrogen_mass }}
outparm {{ topology }} {{ coordinates }}
go
"#;

const REIMAGE_TEMPLATE: &str = r#"trajin {{ raw }}
trajout {{ reimaged }}
center :1-{{ last_residue }}
image familiar
go
"#;

const FRAME_DUMP_TEMPLATE: &str = r#"mol new {{ topology }} type parm7
mol addfile {{ trajectory }} type crdbox waitfor -1

set nf [molinfo top get numframes]
for {set i 0} {$i < $nf} {incr i} {
set a [atomselect top "{{ selection }}" frame $i]
$a writepdb {{ out_dir }}/$i.pdb
}

quit
"#;

/// Mass (Da) assigned to hydrogens by repartitioning.
pub const REPARTITIONED_HYDROGEN_MASS: u32 = 3;

fn render<T: Serialize>(template: &str, view: &T) -> Result<String, TemplateError> {
    let context = Context::from_serialize(view)?;
    let text = Tera::one_off(template, &context, false)?;
    super::ensure_resolved(&text)?;
    Ok(text)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[derive(Serialize)]
struct LeapView {
    pdb: String,
    padding: String,
    topology: String,
    coordinates: String,
}

/// Structure-builder input: solvate, neutralise and save topology/coordinates.
///
/// The structure path is quoted; topology and coordinates are expected as
/// names relative to the builder's working directory.
pub fn leap_input(
    pdb: &Path,
    box_padding: f64,
    topology: &Path,
    coordinates: &Path,
) -> Result<String, TemplateError> {
    if display(pdb).contains('"') {
        return Err(TemplateError::UnquotablePath(pdb.to_path_buf()));
    }
    render(
        LEAP_TEMPLATE,
        &LeapView {
            pdb: display(pdb),
            padding: format!("{:.1}", box_padding),
            topology: display(topology),
            coordinates: display(coordinates),
        },
    )
}

#[derive(Serialize)]
struct RepartitionView {
    hydrogen_mass: u32,
    topology: String,
    coordinates: String,
}

/// Mass-repartition input, rewriting topology and coordinates in place.
pub fn repartition_input(topology: &Path, coordinates: &Path) -> Result<String, TemplateError> {
    render(
        REPARTITION_TEMPLATE,
        &RepartitionView {
            hydrogen_mass: REPARTITIONED_HYDROGEN_MASS,
            topology: display(topology),
            coordinates: display(coordinates),
        },
    )
}

#[derive(Serialize)]
struct ReimageView {
    raw: String,
    reimaged: String,
    last_residue: u32,
}

/// Reimaging input centring residues `1..=last_residue` and imaging molecules.
pub fn reimage_input(
    raw: &Path,
    reimaged: &Path,
    last_residue: u32,
) -> Result<String, TemplateError> {
    if last_residue == 0 {
        return Err(TemplateError::NonPositive {
            field: "numResidues",
            value: 0,
        });
    }
    render(
        REIMAGE_TEMPLATE,
        &ReimageView {
            raw: display(raw),
            reimaged: display(reimaged),
            last_residue,
        },
    )
}

#[derive(Serialize)]
struct FrameDumpView {
    topology: String,
    trajectory: String,
    selection: String,
    out_dir: String,
}

/// Frame dumper script writing `<out_dir>/<index>.pdb` for every frame.
pub fn frame_dump_script(
    topology: &Path,
    trajectory: &Path,
    selection: &str,
    out_dir: &Path,
) -> Result<String, TemplateError> {
    render(
        FRAME_DUMP_TEMPLATE,
        &FrameDumpView {
            topology: display(topology),
            trajectory: display(trajectory),
            selection: selection.to_string(),
            out_dir: display(out_dir),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leap_input() {
        let text = leap_input(
            Path::new("/data/protein.pdb"),
            15.0,
            Path::new("prmtop"),
            Path::new("inpcrd"),
        )
        .unwrap();
        assert!(text.contains("mol = loadpdb \"/data/protein.pdb\"\n"));
        assert!(text.contains("solvatebox mol TIP3PBOX 15.0\n"));
        assert!(text.contains("saveamberparm mol prmtop inpcrd\n"));
        assert!(text.ends_with("quit\n"));
    }

    #[test]
    fn test_leap_input_quotes_structure_path() {
        let text = leap_input(
            Path::new("/home/u/My Runs/protein.pdb"),
            12.5,
            Path::new("prmtop"),
            Path::new("inpcrd"),
        )
        .unwrap();
        assert!(text.contains("mol = loadpdb \"/home/u/My Runs/protein.pdb\"\n"));

        let result = leap_input(
            Path::new("/data/odd\"name.pdb"),
            12.5,
            Path::new("prmtop"),
            Path::new("inpcrd"),
        );
        assert!(matches!(result, Err(TemplateError::UnquotablePath(_))));
    }

    #[test]
    fn test_repartition_input() {
        let text = repartition_input(Path::new("prmtop"), Path::new("inpcrd")).unwrap();
        assert_eq!(
            text,
            "setOverwrite true\nHMassRepartition 3\noutparm prmtop inpcrd\ngo\n"
        );
    }

    #[test]
    fn test_reimage_input_anchors_residues() {
        let text = reimage_input(
            Path::new("03_Prod.mdcrd"),
            Path::new("03_Prod_reimage.mdcrd"),
            56,
        )
        .unwrap();
        assert_eq!(
            text,
            "trajin 03_Prod.mdcrd\ntrajout 03_Prod_reimage.mdcrd\ncenter :1-56\nimage familiar\ngo\n"
        );
        assert!(reimage_input(Path::new("a"), Path::new("b"), 0).is_err());
    }

    #[test]
    fn test_frame_dump_script_keeps_tcl_braces() {
        let text = frame_dump_script(
            Path::new("prmtop.backup"),
            Path::new("03_Prod_reimage.mdcrd"),
            "name CA",
            Path::new("pdbsCA"),
        )
        .unwrap();
        assert!(text.contains("for {set i 0} {$i < $nf} {incr i} {"));
        assert!(text.contains("set a [atomselect top \"name CA\" frame $i]"));
        assert!(text.contains("$a writepdb pdbsCA/$i.pdb"));
        assert!(text.contains("mol addfile 03_Prod_reimage.mdcrd type crdbox waitfor -1"));
    }
}
