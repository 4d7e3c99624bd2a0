use crate::{check_identifiers, snake_name, GeneratedBlock, GeneratedController};
use anyhow::Result;
use dpm_ir::{PowerState, TransitionClass, DELAY_CLASSES};
use std::fmt::Write;

pub struct HeaderGenerator;

impl HeaderGenerator {
    /// Renders the C offset header consumed by firmware, one block per section.
    ///
    /// Component names are mangled into C identifiers the same way as the Rust module.
    pub fn generate(model: &GeneratedController) -> Result<Vec<GeneratedBlock>> {
        check_identifiers(model)?;
        Ok(vec![
            Self::states(),
            Self::capture(),
            Self::config_offsets(),
            Self::components(model),
        ])
    }

    fn states() -> GeneratedBlock {
        let mut body = String::from("// defined states in power manager\n");
        for (name, state) in [
            ("off", PowerState::Off),
            ("on_clock_gated", PowerState::ClockGated),
            ("on", PowerState::On),
        ] {
            let _ = writeln!(body, "#define {} {:#x}", name, state.encoding());
        }
        GeneratedBlock::new("states", body)
    }

    fn capture() -> GeneratedBlock {
        GeneratedBlock::new(
            "capture",
            "// offset to control the power measurement\n#define start_capture 0x1\n#define stop_capture 0\n",
        )
    }

    fn config_offsets() -> GeneratedBlock {
        let mut body = String::from("// offsets of the config registers\n");
        for class in TransitionClass::ALL {
            let _ = writeln!(body, "#define {}_offset {}", class.symbol(), class.index());
        }
        GeneratedBlock::new("config_offsets", body)
    }

    // Offsets are word indices: firmware scales them by the register width.
    fn components(model: &GeneratedController) -> GeneratedBlock {
        let mut body = format!(
            "// fingerprint {}\n// pm addresses mapped to components\n",
            model.fingerprint
        );
        for c in &model.components {
            let name = snake_name(&c.name);
            let _ = writeln!(body, "#define {}_offset {}", name, c.slot_index);
            let _ = writeln!(
                body,
                "#define {}_config_offset {}",
                name,
                c.slot_index * DELAY_CLASSES
            );
        }
        GeneratedBlock::new("components", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splice;
    use dpm_ir::PowerRegisterMap;

    #[test]
    fn test_header_matches_firmware_layout() {
        let map =
            PowerRegisterMap::allocate(&["host", "sensor1", "sensor2", "sensor3"], 4).unwrap();
        let model = GeneratedController::from_map("pm", &map);
        let text = splice("", &HeaderGenerator::generate(&model).unwrap()).unwrap();

        assert!(text.contains("#define off 0x0\n"));
        assert!(text.contains("#define on_clock_gated 0x1\n"));
        assert!(text.contains("#define on 0x3\n"));
        assert!(text.contains("#define start_capture 0x1\n"));
        assert!(text.contains("#define off_on_offset 1\n"));
        assert!(text.contains("#define cg_on_offset 3\n"));
        assert!(text.contains("#define host_offset 0\n#define host_config_offset 0\n"));
        assert!(text.contains("#define sensor3_offset 3\n#define sensor3_config_offset 12\n"));
    }

    #[test]
    fn test_header_regeneration_drops_removed_components() {
        let full = PowerRegisterMap::allocate(&["host", "sensor1", "sensor2"], 4).unwrap();
        let reduced = PowerRegisterMap::allocate(&["host", "sensor2"], 4).unwrap();

        let text = splice(
            "#ifndef PM_ADDR_H\n#define PM_ADDR_H\n",
            &HeaderGenerator::generate(&GeneratedController::from_map("pm", &full)).unwrap(),
        )
        .unwrap();
        let text = splice(
            &text,
            &HeaderGenerator::generate(&GeneratedController::from_map("pm", &reduced)).unwrap(),
        )
        .unwrap();

        assert!(text.starts_with("#ifndef PM_ADDR_H\n#define PM_ADDR_H\n"));
        assert!(!text.contains("sensor1"));
        assert!(text.contains("#define sensor2_offset 1\n"));
        assert!(crate::embedded_fingerprint(&text) == Some(crate::fingerprint(&reduced).as_str()));
    }

    #[test]
    fn test_header_names_are_c_identifiers() {
        let map = PowerRegisterMap::allocate(&["temp-sensor", "3d"], 4).unwrap();
        let model = GeneratedController::from_map("pm", &map);
        let text = splice("", &HeaderGenerator::generate(&model).unwrap()).unwrap();

        assert!(text.contains("#define temp_sensor_offset 0\n"));
        assert!(text.contains("#define temp_sensor_config_offset 0\n"));
        assert!(text.contains("#define _3d_offset 1\n"));
        assert!(text.contains("#define _3d_config_offset 4\n"));
        assert!(!text.contains("temp-sensor"));
        for line in text.lines().filter(|l| l.starts_with("#define ")) {
            let macro_name = line.split_whitespace().nth(1).unwrap();
            assert!(
                !macro_name.starts_with(|c: char| c.is_ascii_digit())
                    && macro_name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "invalid macro name in {:?}",
                line
            );
        }
    }

    #[test]
    fn test_header_rejects_mangling_collisions() {
        let map = PowerRegisterMap::allocate(&["temp-sensor", "temp_sensor"], 4).unwrap();
        let model = GeneratedController::from_map("pm", &map);
        let err = HeaderGenerator::generate(&model).unwrap_err();
        assert!(err.to_string().contains("collides"));
    }
}
