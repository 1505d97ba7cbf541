use crate::db::indices::*;
use crate::error::InputError;
use crate::geom::point::Point;
use crate::geom::polygon::Polygon;
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct LayerData {
    pub name: String,
    pub index: u8,
}

/// Copper layers a pad occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PadLayers {
    Single(u8),
    Through,
}

impl PadLayers {
    #[inline]
    pub fn contains(&self, layer: u8) -> bool {
        match self {
            PadLayers::Single(l) => *l == layer,
            PadLayers::Through => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Pad {
    pub net: NetId,
    pub ref_des: String,
    pub pin: String,
    pub position: Point<f64>,
    pub width: f64,
    pub height: f64,
    pub layers: PadLayers,
}

impl Pad {
    pub fn rect(&self) -> Rect {
        Rect::from_center(self.position, self.width, self.height)
    }

    /// First layer the pad can be entered on.
    pub fn entry_layer(&self) -> u8 {
        match self.layers {
            PadLayers::Single(l) => l,
            PadLayers::Through => 0,
        }
    }
}

/// Inclusive layer span `(from, to)` with `from <= to`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Via {
    pub net: NetId,
    pub position: Point<f64>,
    pub drill: f64,
    pub diameter: f64,
    pub layers: (u8, u8),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Segment {
    pub net: NetId,
    pub layer: u8,
    pub p1: Point<f64>,
    pub p2: Point<f64>,
    pub width: f64,
}

impl Segment {
    pub fn length(&self) -> f64 {
        self.p1.distance(&self.p2)
    }
}

/// Routing keepout. `layer: None` blocks every layer.
#[derive(Clone, Debug)]
pub struct Keepout {
    pub layer: Option<u8>,
    pub rect: Rect,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThermalRelief {
    pub gap: f64,
    pub spoke_width: f64,
    pub spoke_count: u8,
}

/// Rasterised zone copper: horizontal runs of filled cells in world units.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ZoneFill {
    pub runs: Vec<Rect>,
    pub cells: usize,
    pub area: f64,
}

#[derive(Clone, Debug)]
pub struct ZoneData {
    pub net: NetId,
    pub layer: u8,
    pub outline: Polygon,
    pub clearance: f64,
    pub min_thickness: f64,
    pub thermal: Option<ThermalRelief>,
    pub fill: Option<ZoneFill>,
}

#[derive(Clone, Debug)]
pub struct NetData {
    pub name: String,
    pub pads: Vec<PadId>,
    pub pair: Option<PairId>,
    pub segments: Vec<Segment>,
    pub vias: Vec<Via>,
}

#[derive(Clone, Debug)]
pub struct DiffPair {
    pub name: String,
    pub positive: NetId,
    pub negative: NetId,
    /// Edge-to-edge spacing between the two traces.
    pub gap: f64,
}

impl DiffPair {
    pub fn partner(&self, net: NetId) -> Option<NetId> {
        if net == self.positive {
            Some(self.negative)
        } else if net == self.negative {
            Some(self.positive)
        } else {
            None
        }
    }
}

pub struct BoardDB {
    pub name: String,
    pub outline: Rect,
    pub layers: Vec<LayerData>,
    pub pads: Vec<Pad>,
    pub nets: Vec<NetData>,
    pub fixed_vias: Vec<Via>,
    pub fixed_segments: Vec<Segment>,
    pub keepouts: Vec<Keepout>,
    pub zones: Vec<ZoneData>,
    pub pairs: Vec<DiffPair>,

    pub net_name_map: HashMap<String, NetId>,
    pub layer_name_map: HashMap<String, u8>,
}

impl BoardDB {
    pub fn new(name: impl Into<String>, outline: Rect) -> Self {
        Self {
            name: name.into(),
            outline,
            layers: Vec::new(),
            pads: Vec::with_capacity(256),
            nets: Vec::with_capacity(64),
            fixed_vias: Vec::new(),
            fixed_segments: Vec::new(),
            keepouts: Vec::new(),
            zones: Vec::new(),
            pairs: Vec::new(),
            net_name_map: HashMap::new(),
            layer_name_map: HashMap::new(),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn add_layer(&mut self, name: impl Into<String>) -> u8 {
        let name = name.into();
        if let Some(&idx) = self.layer_name_map.get(&name) {
            return idx;
        }
        let idx = self.layers.len() as u8;
        self.layer_name_map.insert(name.clone(), idx);
        self.layers.push(LayerData { name, index: idx });
        idx
    }

    pub fn layer_index(&self, name: &str) -> Result<u8, InputError> {
        self.layer_name_map
            .get(name)
            .copied()
            .ok_or_else(|| InputError::UnknownLayer(name.to_string()))
    }

    pub fn add_net(&mut self, name: impl Into<String>) -> NetId {
        let name = name.into();
        if let Some(&id) = self.net_name_map.get(&name) {
            return id;
        }
        let id = NetId::new(self.nets.len());
        self.nets.push(NetData {
            name: name.clone(),
            pads: Vec::new(),
            pair: None,
            segments: Vec::new(),
            vias: Vec::new(),
        });
        self.net_name_map.insert(name, id);
        id
    }

    pub fn net_id(&self, name: &str) -> Result<NetId, InputError> {
        self.net_name_map
            .get(name)
            .copied()
            .ok_or_else(|| InputError::UnknownNet(name.to_string()))
    }

    pub fn net_name(&self, net: NetId) -> &str {
        &self.nets[net.index()].name
    }

    pub fn add_pad(&mut self, pad: Pad) -> PadId {
        let id = PadId::new(self.pads.len());
        self.nets[pad.net.index()].pads.push(id);
        self.pads.push(pad);
        id
    }

    pub fn add_fixed_via(&mut self, via: Via) {
        self.fixed_vias.push(via);
    }

    pub fn add_fixed_segment(&mut self, seg: Segment) {
        self.fixed_segments.push(seg);
    }

    pub fn add_keepout(&mut self, layer: Option<u8>, rect: Rect) {
        self.keepouts.push(Keepout { layer, rect });
    }

    pub fn add_zone(&mut self, zone: ZoneData) -> ZoneId {
        let id = ZoneId::new(self.zones.len());
        self.zones.push(zone);
        id
    }

    pub fn add_pair(
        &mut self,
        name: impl Into<String>,
        positive: NetId,
        negative: NetId,
        gap: f64,
    ) -> Result<PairId, InputError> {
        let name = name.into();
        if positive == negative
            || self.nets[positive.index()].pair.is_some()
            || self.nets[negative.index()].pair.is_some()
        {
            return Err(InputError::InvalidPair(name));
        }
        let id = PairId::new(self.pairs.len());
        self.nets[positive.index()].pair = Some(id);
        self.nets[negative.index()].pair = Some(id);
        self.pairs.push(DiffPair {
            name,
            positive,
            negative,
            gap,
        });
        Ok(id)
    }

    pub fn net_pads(&self, net: NetId) -> impl Iterator<Item = &Pad> + '_ {
        self.nets[net.index()]
            .pads
            .iter()
            .map(move |p| &self.pads[p.index()])
    }

    /// Centre-to-centre distance from a pad to its nearest sibling on the
    /// same component. `None` for single-pad components.
    pub fn pad_pitch(&self, pad: PadId) -> Option<f64> {
        let p = &self.pads[pad.index()];
        self.pads
            .iter()
            .enumerate()
            .filter(|(i, q)| *i != pad.index() && q.ref_des == p.ref_des)
            .map(|(_, q)| p.position.distance(&q.position))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Smallest pad pitch among the net's terminals.
    pub fn net_min_pitch(&self, net: NetId) -> Option<f64> {
        self.nets[net.index()]
            .pads
            .iter()
            .filter_map(|&p| self.pad_pitch(p))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Drops every routed segment, via and zone fill. Fixed copper stays.
    pub fn clear_routes(&mut self) {
        for net in &mut self.nets {
            net.segments.clear();
            net.vias.clear();
        }
        for zone in &mut self.zones {
            zone.fill = None;
        }
    }

    pub fn check_layer(&self, layer: u8) -> Result<(), InputError> {
        if (layer as usize) < self.layers.len() {
            Ok(())
        } else {
            Err(InputError::LayerOutOfRange {
                layer,
                layers: self.layers.len(),
            })
        }
    }

    /// Structural validation run before any grid is built.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.layers.is_empty() {
            return Err(InputError::EmptyLayerStack);
        }
        // Layer indices and the layer count are stored as u8.
        if self.layers.len() > u8::MAX as usize {
            return Err(InputError::TooManyLayers(self.layers.len()));
        }
        if self.outline.width() <= 0.0 || self.outline.height() <= 0.0 {
            return Err(InputError::DegenerateBoard);
        }
        for pad in &self.pads {
            if !self.outline.contains(pad.position) {
                return Err(InputError::PadOutOfBounds {
                    ref_des: pad.ref_des.clone(),
                    pin: pad.pin.clone(),
                    x: pad.position.x,
                    y: pad.position.y,
                });
            }
            if let PadLayers::Single(l) = pad.layers {
                self.check_layer(l)?;
            }
        }
        for via in &self.fixed_vias {
            self.check_layer(via.layers.1)?;
        }
        for seg in &self.fixed_segments {
            self.check_layer(seg.layer)?;
        }
        for k in &self.keepouts {
            if let Some(l) = k.layer {
                self.check_layer(l)?;
            }
        }
        for (i, zone) in self.zones.iter().enumerate() {
            self.check_layer(zone.layer)?;
            if zone.outline.is_degenerate() {
                return Err(InputError::DegenerateZone {
                    zone: i,
                    net: self.net_name(zone.net).to_string(),
                });
            }
        }
        for pair in &self.pairs {
            if pair.gap <= 0.0 {
                return Err(InputError::InvalidPair(pair.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> BoardDB {
        let mut db = BoardDB::new("t", Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)));
        db.add_layer("F.Cu");
        db.add_layer("B.Cu");
        db
    }

    fn pad(net: NetId, ref_des: &str, pin: &str, x: f64, y: f64) -> Pad {
        Pad {
            net,
            ref_des: ref_des.into(),
            pin: pin.into(),
            position: Point::new(x, y),
            width: 0.3,
            height: 0.3,
            layers: PadLayers::Single(0),
        }
    }

    #[test]
    fn pitch_uses_nearest_sibling() {
        let mut db = board();
        let a = db.add_net("A");
        let b = db.add_net("B");
        let p0 = db.add_pad(pad(a, "U1", "1", 1.0, 1.0));
        db.add_pad(pad(b, "U1", "2", 1.5, 1.0));
        db.add_pad(pad(b, "U1", "3", 3.0, 1.0));
        let lone = db.add_pad(pad(a, "J1", "1", 8.0, 8.0));
        assert!((db.pad_pitch(p0).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(db.pad_pitch(lone), None);
        assert!((db.net_min_pitch(a).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn validate_rejects_pad_outside_outline() {
        let mut db = board();
        let a = db.add_net("A");
        db.add_pad(pad(a, "U1", "1", 11.0, 1.0));
        assert!(matches!(db.validate(), Err(InputError::PadOutOfBounds { .. })));
    }

    #[test]
    fn validate_rejects_oversized_layer_stack() {
        let mut db = board();
        for i in 2..u8::MAX as usize {
            db.add_layer(format!("In{i}.Cu"));
        }
        assert_eq!(db.num_layers(), 255);
        assert!(db.validate().is_ok());
        db.add_layer("In255.Cu");
        assert_eq!(db.validate(), Err(InputError::TooManyLayers(256)));
    }

    #[test]
    fn validate_rejects_degenerate_zone() {
        let mut db = board();
        let a = db.add_net("GND");
        db.add_zone(ZoneData {
            net: a,
            layer: 0,
            outline: Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]),
            clearance: 0.2,
            min_thickness: 0.2,
            thermal: None,
            fill: None,
        });
        assert!(matches!(db.validate(), Err(InputError::DegenerateZone { zone: 0, .. })));
    }

    #[test]
    fn pair_members_are_linked() {
        let mut db = board();
        let p = db.add_net("D+");
        let n = db.add_net("D-");
        let id = db.add_pair("USB", p, n, 0.15).unwrap();
        assert_eq!(db.nets[p.index()].pair, Some(id));
        assert_eq!(db.pairs[id.index()].partner(n), Some(p));
        assert!(db.add_pair("again", p, n, 0.15).is_err());
    }
}
