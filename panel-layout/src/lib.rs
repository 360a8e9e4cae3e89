use indicator_engine::{IndicatorSeries, OscillatorFamily, PanelClass};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative height of the main price panel; every other panel gets 1.
const MAIN_PANEL_WEIGHT: u32 = 4;

/// Internal invariant violation: a plan whose ratio vector or panel
/// indices disagree with its panel count. A renderer handed such a plan
/// would fail or mis-layout, so this is surfaced, never swallowed.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("panel ratio vector has {ratios} entries for {panels} panels")]
    RatioMismatch { ratios: usize, panels: usize },
    #[error("series {label:?} assigned to panel {panel} of {panels}")]
    PanelOutOfRange {
        label: String,
        panel: usize,
        panels: usize,
    },
}

/// One series bound to its target panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub series: IndicatorSeries,
    pub panel: usize,
}

/// The layout handed to the rendering backend: how many panels, their
/// relative heights, and which series draws where. Panel 0 is the price
/// panel; panel 1 is volume when enabled; oscillator families follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutPlan {
    pub panel_count: usize,
    pub panel_ratios: Vec<u32>,
    pub placements: Vec<Placement>,
    pub volume_panel: Option<usize>,
}

impl LayoutPlan {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.panel_ratios.len() != self.panel_count {
            return Err(LayoutError::RatioMismatch {
                ratios: self.panel_ratios.len(),
                panels: self.panel_count,
            });
        }
        for placement in &self.placements {
            if placement.panel >= self.panel_count {
                return Err(LayoutError::PanelOutOfRange {
                    label: placement.series.label.clone(),
                    panel: placement.panel,
                    panels: self.panel_count,
                });
            }
        }
        Ok(())
    }
}

/// Assign every series a panel index in a single deterministic pass.
///
/// Main-class series land on panel 0. Oscillator families get one panel
/// each (never one per series), numbered from 2 upward in the order the
/// families first appear. The returned plan is already validated.
pub fn allocate(
    series: Vec<IndicatorSeries>,
    volume_enabled: bool,
) -> Result<LayoutPlan, LayoutError> {
    let volume_panel = volume_enabled.then_some(1);
    let first_oscillator_panel = if volume_enabled { 2 } else { 1 };

    // First-appearance order; at most four families, a scan beats a map.
    let mut families: Vec<OscillatorFamily> = Vec::new();
    for s in &series {
        if let PanelClass::Oscillator(family) = s.panel_class {
            if !families.contains(&family) {
                families.push(family);
            }
        }
    }

    let panel_count = 1 + usize::from(volume_enabled) + families.len();
    let mut panel_ratios = vec![MAIN_PANEL_WEIGHT];
    panel_ratios.resize(panel_count, 1);

    let placements = series
        .into_iter()
        .map(|s| {
            let panel = match s.panel_class {
                PanelClass::Main => 0,
                PanelClass::Oscillator(family) => {
                    // Families were collected from this same list, so the
                    // lookup cannot miss.
                    let slot = families.iter().position(|f| *f == family).unwrap_or(0);
                    first_oscillator_panel + slot
                }
            };
            Placement { series: s, panel }
        })
        .collect();

    let plan = LayoutPlan {
        panel_count,
        panel_ratios,
        placements,
        volume_panel,
    };
    plan.validate()?;
    Ok(plan)
}
