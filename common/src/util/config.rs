use crate::error::InputError;
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub design_rules: DesignRules,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    #[serde(default)]
    pub zones: ZoneConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub input: InputConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), InputError> {
        self.design_rules.validate()?;
        let n = &self.negotiation;
        if n.max_iterations == 0 {
            return Err(InputError::InvalidRules(
                "negotiation.max_iterations must be at least 1".into(),
            ));
        }
        if n.history_increment < 0.0 || n.penalty_multiplier < 1.0 || n.initial_penalty < 0.0 {
            return Err(InputError::InvalidRules(
                "negotiation costs must be non-negative and the penalty must not shrink".into(),
            ));
        }
        if self.search.window_margin > self.search.window_margin_max {
            return Err(InputError::InvalidRules(
                "search.window_margin exceeds search.window_margin_max".into(),
            ));
        }
        if self.orchestrator.subgrid_factor == 0 {
            return Err(InputError::InvalidRules(
                "orchestrator.subgrid_factor must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DesignRules {
    #[serde(default = "default_trace_width")]
    pub trace_width: f64,
    #[serde(default = "default_clearance")]
    pub clearance: f64,
    #[serde(default = "default_via_drill")]
    pub via_drill: f64,
    #[serde(default = "default_via_diameter")]
    pub via_diameter: f64,
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: f64,
    /// Copper-free band along the board outline. 0 disables it.
    #[serde(default)]
    pub edge_clearance: f64,
    #[serde(default)]
    pub costs: CostWeights,
    #[serde(default)]
    pub bidirectional: BidirectionalConfig,
    #[serde(default)]
    pub neck_down: NeckDownConfig,
}

impl Default for DesignRules {
    fn default() -> Self {
        Self {
            trace_width: default_trace_width(),
            clearance: default_clearance(),
            via_drill: default_via_drill(),
            via_diameter: default_via_diameter(),
            grid_resolution: default_grid_resolution(),
            edge_clearance: 0.0,
            costs: CostWeights::default(),
            bidirectional: BidirectionalConfig::default(),
            neck_down: NeckDownConfig::default(),
        }
    }
}

impl DesignRules {
    /// Rejects rule sets no router could honour.
    pub fn validate(&self) -> Result<(), InputError> {
        let bad = |msg: &str| Err(InputError::InvalidRules(msg.to_string()));
        let finite = [
            self.trace_width,
            self.clearance,
            self.via_drill,
            self.via_diameter,
            self.grid_resolution,
            self.edge_clearance,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return bad("rule values must be finite");
        }
        if self.grid_resolution <= 0.0 {
            return bad("grid_resolution must be positive");
        }
        if self.trace_width <= 0.0 {
            return bad("trace_width must be positive");
        }
        if self.clearance < 0.0 || self.edge_clearance < 0.0 {
            return bad("clearances must be non-negative");
        }
        if self.via_drill <= 0.0 || self.via_diameter <= self.via_drill {
            return bad("via_diameter must exceed a positive via_drill");
        }
        let c = &self.costs;
        if c.straight <= 0.0 || c.diagonal <= 0.0 {
            return bad("straight and diagonal weights must be positive");
        }
        if c.via < 0.0 || c.turn < 0.0 || c.congestion < 0.0 {
            return bad("cost weights must be non-negative");
        }
        let nd = &self.neck_down;
        if nd.enabled {
            if nd.min_width <= 0.0 || nd.min_width > self.trace_width {
                return bad("neck_down.min_width must lie in (0, trace_width]");
            }
            if nd.taper_distance < 0.0 || nd.pitch_threshold <= 0.0 {
                return bad("neck_down taper and pitch threshold must be positive");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostWeights {
    #[serde(default = "default_via_cost")]
    pub via: f64,
    #[serde(default = "default_turn_cost")]
    pub turn: f64,
    #[serde(default = "default_weight_one")]
    pub congestion: f64,
    #[serde(default = "default_weight_one")]
    pub straight: f64,
    #[serde(default = "default_weight_one")]
    pub diagonal: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            via: default_via_cost(),
            turn: default_turn_cost(),
            congestion: default_weight_one(),
            straight: default_weight_one(),
            diagonal: default_weight_one(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BidirectionalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Straight-line terminal distance, in cells, above which both ends search.
    #[serde(default = "default_bidir_threshold")]
    pub node_threshold: u32,
}

impl Default for BidirectionalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_threshold: default_bidir_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NeckDownConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_neck_min_width")]
    pub min_width: f64,
    #[serde(default = "default_neck_taper")]
    pub taper_distance: f64,
    #[serde(default = "default_neck_pitch")]
    pub pitch_threshold: f64,
}

impl Default for NeckDownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_width: default_neck_min_width(),
            taper_distance: default_neck_taper(),
            pitch_threshold: default_neck_pitch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,
    #[serde(default = "default_window_margin")]
    pub window_margin: u32,
    #[serde(default = "default_window_margin_max")]
    pub window_margin_max: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_expansions: default_max_expansions(),
            window_margin: default_window_margin(),
            window_margin_max: default_window_margin_max(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NegotiationConfig {
    #[serde(default = "default_neg_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_history_increment")]
    pub history_increment: f64,
    #[serde(default = "default_history_cap")]
    pub history_cap: f64,
    #[serde(default = "default_initial_penalty")]
    pub initial_penalty: f64,
    #[serde(default = "default_penalty_multiplier")]
    pub penalty_multiplier: f64,
    #[serde(default = "default_max_penalty")]
    pub max_penalty: f64,
    #[serde(default = "default_true")]
    pub resolve_via_conflicts: bool,
    /// Cells (Chebyshev) within which two foreign vias count as conflicting.
    #[serde(default = "default_via_conflict_radius")]
    pub via_conflict_radius: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_neg_max_iterations(),
            history_increment: default_history_increment(),
            history_cap: default_history_cap(),
            initial_penalty: default_initial_penalty(),
            penalty_multiplier: default_penalty_multiplier(),
            max_penalty: default_max_penalty(),
            resolve_via_conflicts: true,
            via_conflict_radius: default_via_conflict_radius(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    #[serde(default = "default_true")]
    pub fill: bool,
    #[serde(default = "default_true")]
    pub thermal_relief: bool,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            fill: true,
            thermal_relief: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Radius, in board units, of the pad-density search around each terminal.
    #[serde(default = "default_density_radius")]
    pub density_radius: f64,
    /// Foreign pads inside that square above which a net counts as dense.
    #[serde(default = "default_density_threshold")]
    pub density_threshold: usize,
    #[serde(default = "default_subgrid_factor")]
    pub subgrid_factor: u32,
    /// Extra cells around a dense region covered by the fine subgrid.
    #[serde(default = "default_subgrid_margin")]
    pub subgrid_margin: u32,
    /// Distance, in cells, an escape stub must clear a pad cluster by.
    #[serde(default = "default_escape_margin")]
    pub escape_margin: u32,
    #[serde(default = "default_pair_guide_penalty")]
    pub pair_guide_penalty: f64,
    #[serde(default = "default_pair_skew_tolerance")]
    pub pair_skew_tolerance: f64,
    #[serde(default = "default_true")]
    pub fallback: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            density_radius: default_density_radius(),
            density_threshold: default_density_threshold(),
            subgrid_factor: default_subgrid_factor(),
            subgrid_margin: default_subgrid_margin(),
            escape_margin: default_escape_margin(),
            pair_guide_penalty: default_pair_guide_penalty(),
            pair_skew_tolerance: default_pair_skew_tolerance(),
            fallback: true,
        }
    }
}

/// Array backend used for per-cell cost evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Parallel,
    Cuda,
    Metal,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Cpu => "cpu",
            BackendKind::Parallel => "parallel",
            BackendKind::Cuda => "cuda",
            BackendKind::Metal => "metal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    FallbackToCpu,
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_fallback")]
    pub fallback: FallbackPolicy,
    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: default_backend(),
            fallback: default_fallback(),
            max_batch_size: default_max_batch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    /// Side, in cells, of the tiles used for congestion accounting.
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_max_obstacles")]
    pub max_obstacles: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            max_obstacles: default_max_obstacles(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_board_file")]
    pub board_file: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
    #[serde(default = "default_image_file")]
    pub image_file: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            board_file: default_board_file(),
            output_file: default_output_file(),
            image_file: default_image_file(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_trace_width() -> f64 {
    0.25
}

fn default_clearance() -> f64 {
    0.2
}

fn default_via_drill() -> f64 {
    0.3
}

fn default_via_diameter() -> f64 {
    0.6
}

fn default_grid_resolution() -> f64 {
    0.1
}

fn default_via_cost() -> f64 {
    10.0
}

fn default_turn_cost() -> f64 {
    0.5
}

fn default_weight_one() -> f64 {
    1.0
}

fn default_bidir_threshold() -> u32 {
    48
}

fn default_neck_min_width() -> f64 {
    0.1
}

fn default_neck_taper() -> f64 {
    0.5
}

fn default_neck_pitch() -> f64 {
    0.65
}

/// Counted per search state, a cell together with its arrival heading.
fn default_max_expansions() -> usize {
    1_000_000
}

fn default_window_margin() -> u32 {
    20
}

fn default_window_margin_max() -> u32 {
    200
}

fn default_neg_max_iterations() -> usize {
    50
}

fn default_history_increment() -> f64 {
    0.5
}

fn default_history_cap() -> f64 {
    1000.0
}

fn default_initial_penalty() -> f64 {
    0.5
}

fn default_penalty_multiplier() -> f64 {
    1.5
}

fn default_max_penalty() -> f64 {
    1000.0
}

fn default_via_conflict_radius() -> u32 {
    1
}

fn default_density_radius() -> f64 {
    2.0
}

fn default_density_threshold() -> usize {
    8
}

fn default_subgrid_factor() -> u32 {
    2
}

fn default_subgrid_margin() -> u32 {
    10
}

fn default_escape_margin() -> u32 {
    6
}

fn default_pair_guide_penalty() -> f64 {
    2.0
}

fn default_pair_skew_tolerance() -> f64 {
    0.5
}

fn default_backend() -> BackendKind {
    BackendKind::Parallel
}

fn default_fallback() -> FallbackPolicy {
    FallbackPolicy::FallbackToCpu
}

fn default_max_batch() -> usize {
    64
}

fn default_tile_size() -> u32 {
    10
}

fn default_max_obstacles() -> usize {
    32
}

fn default_board_file() -> String {
    "inputs/board.toml".to_string()
}

fn default_output_file() -> String {
    "output/routed.toml".to_string()
}

fn default_image_file() -> String {
    "output/routed.png".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [design_rules]
            clearance = 0.15
            [design_rules.costs]
            via = 4.0
            [batch]
            backend = "cuda"
            fallback = "strict"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.design_rules.clearance, 0.15);
        assert_eq!(cfg.design_rules.trace_width, 0.25);
        assert_eq!(cfg.design_rules.costs.via, 4.0);
        assert_eq!(cfg.design_rules.costs.straight, 1.0);
        assert_eq!(cfg.batch.backend, BackendKind::Cuda);
        assert_eq!(cfg.batch.fallback, FallbackPolicy::Strict);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn contradictory_rules_are_rejected() {
        let mut rules = DesignRules::default();
        rules.via_diameter = 0.2;
        assert!(matches!(rules.validate(), Err(InputError::InvalidRules(_))));

        let mut rules = DesignRules::default();
        rules.neck_down.min_width = 0.5;
        assert!(rules.validate().is_err());

        let mut rules = DesignRules::default();
        rules.grid_resolution = 0.0;
        assert!(rules.validate().is_err());
    }
}
