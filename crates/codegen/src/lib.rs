use anyhow::{bail, Result};
use dpm_ir::{PowerRegisterMap, PowerState, Region, TransitionClass, DELAY_CLASSES};
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub mod header;
pub mod splice;

pub use splice::{splice, strip_generated, GeneratedBlock};

/// Ports, handler and offsets generated for one managed component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentModel {
    pub name: String,
    pub slot_index: usize,
    pub power_port: String,
    pub voltage_port: String,
    pub state_handler: String,
    pub state_offset: u64,
    pub voltage_offset: u64,
    pub config_offset: u64,
}

/// One row of the generated dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEntry {
    pub region: Region,
    pub offset: u64,
    pub slot_index: usize,
    /// Delay class for delay-config entries.
    pub class: Option<TransitionClass>,
}

/// In-memory form of everything generated for a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedController {
    pub name: String,
    pub word_size: u64,
    pub fingerprint: String,
    pub components: Vec<ComponentModel>,
    pub dispatch: Vec<DispatchEntry>,
}

impl GeneratedController {
    pub fn from_map(name: &str, map: &PowerRegisterMap) -> Self {
        let word_size = map.word_size();
        let components = map
            .slots()
            .iter()
            .map(|slot| ComponentModel {
                name: slot.name.clone(),
                slot_index: slot.slot_index,
                power_port: format!("power_ctrl_{}", slot.name),
                voltage_port: format!("voltage_ctrl_{}", slot.name),
                state_handler: format!("{}_state_event", snake_name(&slot.name)),
                state_offset: slot.state_offset,
                voltage_offset: slot.voltage_offset,
                config_offset: slot.config_offset,
            })
            .collect();

        let mut dispatch = Vec::new();
        for slot in map.slots() {
            dispatch.push(DispatchEntry {
                region: Region::State,
                offset: slot.state_offset,
                slot_index: slot.slot_index,
                class: None,
            });
            dispatch.push(DispatchEntry {
                region: Region::Voltage,
                offset: slot.voltage_offset,
                slot_index: slot.slot_index,
                class: None,
            });
            for class in TransitionClass::ALL {
                dispatch.push(DispatchEntry {
                    region: Region::DelayConfig,
                    offset: slot.delay_offset(class, word_size),
                    slot_index: slot.slot_index,
                    class: Some(class),
                });
            }
        }

        Self {
            name: name.to_string(),
            word_size,
            fingerprint: fingerprint(map),
            components,
            dispatch,
        }
    }

    fn entries(&self, region: Region) -> impl Iterator<Item = &DispatchEntry> {
        self.dispatch.iter().filter(move |e| e.region == region)
    }
}

/// Hash of the ordered component list and word size.
pub fn fingerprint(map: &PowerRegisterMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(map.word_size().to_le_bytes());
    for slot in map.slots() {
        hasher.update(slot.name.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Reads the fingerprint embedded in a generated file, if any.
pub fn embedded_fingerprint(text: &str) -> Option<&str> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("// fingerprint "))
        .map(str::trim)
}

/// True when `text` was generated from a different component list or word size.
pub fn is_stale(text: &str, map: &PowerRegisterMap) -> bool {
    embedded_fingerprint(text) != Some(fingerprint(map).as_str())
}

pub(crate) fn snake_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Fails when two component names mangle to the same identifier.
pub(crate) fn check_identifiers(model: &GeneratedController) -> Result<()> {
    let mut seen = HashSet::new();
    for c in &model.components {
        if !seen.insert(snake_name(&c.name)) {
            bail!(
                "Component '{}' collides with another component after identifier mangling",
                c.name
            );
        }
    }
    Ok(())
}

fn const_ident(name: &str, suffix: &str) -> Ident {
    format_ident!("{}_{}", snake_name(name).to_ascii_uppercase(), suffix)
}

pub struct RustGenerator;

impl RustGenerator {
    /// Renders the Rust offset module as named blocks.
    ///
    /// Each block is checked to parse as Rust items before it is returned.
    pub fn generate(model: &GeneratedController) -> Result<Vec<GeneratedBlock>> {
        check_identifiers(model)?;

        let blocks = vec![
            ("encoding", Self::encoding(model)),
            ("offsets", Self::offsets(model)),
            ("components", Self::components(model)),
            ("handlers", Self::handlers(model)),
            ("dispatch", Self::dispatch(model)),
        ];

        blocks
            .into_iter()
            .map(|(name, tokens)| -> Result<GeneratedBlock> {
                syn::parse2::<syn::File>(tokens.clone())?;
                let mut body = tokens.to_string();
                if name == "encoding" {
                    body = format!("// fingerprint {}\n{}", model.fingerprint, body);
                }
                Ok(GeneratedBlock::new(name, body))
            })
            .collect()
    }

    fn encoding(model: &GeneratedController) -> TokenStream {
        let off = PowerState::Off.encoding() as u32;
        let cg = PowerState::ClockGated.encoding() as u32;
        let on = PowerState::On.encoding() as u32;
        let class_consts = TransitionClass::ALL.iter().map(|class| {
            let ident = format_ident!("{}_OFFSET", class.symbol().to_ascii_uppercase());
            let index = class.index() as u32;
            quote! { pub const #ident: u32 = #index; }
        });
        let word_size = model.word_size;
        let fingerprint = &model.fingerprint;
        let delay_classes = DELAY_CLASSES;

        quote! {
            pub const OFF: u32 = #off;
            pub const ON_CLOCK_GATED: u32 = #cg;
            pub const ON: u32 = #on;
            pub const START_CAPTURE: u32 = 1u32;
            pub const STOP_CAPTURE: u32 = 0u32;
            #(#class_consts)*
            pub const DELAY_CLASSES: usize = #delay_classes;
            pub const WORD_SIZE: u64 = #word_size;
            pub const FINGERPRINT: &str = #fingerprint;
        }
    }

    // Word indices, matching the C header.
    fn offsets(model: &GeneratedController) -> TokenStream {
        let consts = model.components.iter().map(|c| {
            let offset = const_ident(&c.name, "OFFSET");
            let config = const_ident(&c.name, "CONFIG_OFFSET");
            let slot = c.slot_index as u32;
            let config_word = (c.slot_index * DELAY_CLASSES) as u32;
            quote! {
                pub const #offset: u32 = #slot;
                pub const #config: u32 = #config_word;
            }
        });
        quote! { #(#consts)* }
    }

    fn components(model: &GeneratedController) -> TokenStream {
        let count = model.components.len();
        let rows = model.components.iter().map(|c| {
            let name = &c.name;
            let slot = c.slot_index;
            let state = c.state_offset;
            let voltage = c.voltage_offset;
            let config = c.config_offset;
            let power_port = &c.power_port;
            let voltage_port = &c.voltage_port;
            quote! {
                Component {
                    name: #name,
                    slot: #slot,
                    state_offset: #state,
                    voltage_offset: #voltage,
                    config_offset: #config,
                    power_port: #power_port,
                    voltage_port: #voltage_port,
                },
            }
        });
        quote! {
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct Component {
                pub name: &'static str,
                pub slot: usize,
                pub state_offset: u64,
                pub voltage_offset: u64,
                pub config_offset: u64,
                pub power_port: &'static str,
                pub voltage_port: &'static str,
            }

            pub const COMPONENTS: [Component; #count] = [#(#rows)*];
        }
    }

    fn handlers(model: &GeneratedController) -> TokenStream {
        let count = model.components.len();
        let handlers: Vec<Ident> = model
            .components
            .iter()
            .map(|c| format_ident!("{}", c.state_handler))
            .collect();
        let fns = model.components.iter().zip(&handlers).map(|(c, handler)| {
            let slot = c.slot_index;
            quote! {
                pub fn #handler(ports: &mut dyn PowerPorts, state: u32) {
                    ports.drive_power(#slot, state);
                }
            }
        });
        quote! {
            pub trait PowerPorts {
                fn drive_power(&mut self, slot: usize, state: u32);
                fn drive_voltage(&mut self, slot: usize, voltage: f32);
            }

            #(#fns)*

            pub const STATE_HANDLERS: [fn(&mut dyn PowerPorts, u32); #count] = [#(#handlers),*];
        }
    }

    fn dispatch(model: &GeneratedController) -> TokenStream {
        let slot_match = |region: Region| {
            let offsets: Vec<u64> = model.entries(region).map(|e| e.offset).collect();
            let slots: Vec<usize> = model.entries(region).map(|e| e.slot_index).collect();
            quote! {
                match offset {
                    #(#offsets => Some(#slots),)*
                    _ => None,
                }
            }
        };
        let state = slot_match(Region::State);
        let voltage = slot_match(Region::Voltage);

        let config_offsets: Vec<u64> = model.entries(Region::DelayConfig).map(|e| e.offset).collect();
        let config_slots: Vec<usize> = model
            .entries(Region::DelayConfig)
            .map(|e| e.slot_index)
            .collect();
        let config_classes: Vec<usize> = model
            .entries(Region::DelayConfig)
            .map(|e| e.class.map_or(0, |c| c.index()))
            .collect();

        quote! {
            pub fn state_slot(offset: u64) -> Option<usize> {
                #state
            }

            pub fn voltage_slot(offset: u64) -> Option<usize> {
                #voltage
            }

            /// Slot and delay class of a delay-config offset.
            pub fn config_slot(offset: u64) -> Option<(usize, usize)> {
                match offset {
                    #(#config_offsets => Some((#config_slots, #config_classes)),)*
                    _ => None,
                }
            }
        }
    }
}
