//! TOML board description.
//!
//! ```toml
//! [board]
//! name = "demo"
//! outline = [0.0, 0.0, 40.0, 30.0]
//! layers = ["F.Cu", "B.Cu"]
//!
//! [[pad]]
//! ref_des = "U1"
//! pin = "1"
//! net = "GND"
//! at = [5.0, 5.0]
//! size = [0.6, 0.6]
//! layer = "F.Cu"      # omit for a through-hole pad
//! ```
//!
//! Routed copper is written back in the same format under `[[segment]]`
//! and `[[via]]` with `routed = true`.

use crate::db::core::*;
use crate::db::indices::NetId;
use crate::error::InputError;
use crate::geom::point::Point;
use crate::geom::polygon::Polygon;
use crate::geom::rect::Rect;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardFile {
    pub board: BoardHeader,
    #[serde(default, rename = "pad")]
    pub pads: Vec<PadEntry>,
    #[serde(default, rename = "via")]
    pub vias: Vec<ViaEntry>,
    #[serde(default, rename = "segment")]
    pub segments: Vec<SegmentEntry>,
    #[serde(default, rename = "keepout")]
    pub keepouts: Vec<KeepoutEntry>,
    #[serde(default, rename = "zone")]
    pub zones: Vec<ZoneEntry>,
    #[serde(default, rename = "pair")]
    pub pairs: Vec<PairEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardHeader {
    #[serde(default)]
    pub name: String,
    /// `[min_x, min_y, max_x, max_y]`
    pub outline: [f64; 4],
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PadEntry {
    pub ref_des: String,
    pub pin: String,
    pub net: String,
    pub at: [f64; 2],
    pub size: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViaEntry {
    pub net: String,
    pub at: [f64; 2],
    pub drill: f64,
    pub diameter: f64,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub routed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub net: String,
    pub layer: String,
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub width: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub routed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepoutEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    pub rect: [f64; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneEntry {
    pub net: String,
    pub layer: String,
    pub outline: Vec<[f64; 2]>,
    #[serde(default = "default_zone_clearance")]
    pub clearance: f64,
    #[serde(default = "default_zone_min_thickness")]
    pub min_thickness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal: Option<ThermalRelief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_area: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fill: Vec<[f64; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairEntry {
    pub name: String,
    pub positive: String,
    pub negative: String,
    pub gap: f64,
}

fn default_zone_clearance() -> f64 {
    0.3
}

fn default_zone_min_thickness() -> f64 {
    0.25
}

fn rect_of(r: [f64; 4]) -> Rect {
    Rect::new(
        Point::new(r[0].min(r[2]), r[1].min(r[3])),
        Point::new(r[0].max(r[2]), r[1].max(r[3])),
    )
}

fn arr_of(r: &Rect) -> [f64; 4] {
    [r.min.x, r.min.y, r.max.x, r.max.y]
}

pub fn parse(path: &Path) -> Result<BoardDB> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading board file {}", path.display()))?;
    parse_str(&content).with_context(|| format!("parsing board file {}", path.display()))
}

pub fn parse_str(content: &str) -> Result<BoardDB> {
    let file: BoardFile = toml::from_str(content)?;
    Ok(file.into_db()?)
}

pub fn write(db: &BoardDB, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(&BoardFile::from_db(db))?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

impl BoardFile {
    pub fn into_db(self) -> Result<BoardDB, InputError> {
        let mut db = BoardDB::new(self.board.name, rect_of(self.board.outline));
        for l in &self.board.layers {
            db.add_layer(l.as_str());
        }

        for p in self.pads {
            let net = db.add_net(p.net);
            let layers = match p.layer {
                Some(l) => PadLayers::Single(db.layer_index(&l)?),
                None => PadLayers::Through,
            };
            db.add_pad(Pad {
                net,
                ref_des: p.ref_des,
                pin: p.pin,
                position: Point::new(p.at[0], p.at[1]),
                width: p.size[0],
                height: p.size[1],
                layers,
            });
        }

        for v in self.vias {
            let net = db.add_net(v.net);
            let (a, b) = (db.layer_index(&v.from)?, db.layer_index(&v.to)?);
            let via = Via {
                net,
                position: Point::new(v.at[0], v.at[1]),
                drill: v.drill,
                diameter: v.diameter,
                layers: (a.min(b), a.max(b)),
            };
            if v.routed {
                db.nets[net.index()].vias.push(via);
            } else {
                db.add_fixed_via(via);
            }
        }

        for s in self.segments {
            let net = db.add_net(s.net);
            let seg = Segment {
                net,
                layer: db.layer_index(&s.layer)?,
                p1: Point::new(s.start[0], s.start[1]),
                p2: Point::new(s.end[0], s.end[1]),
                width: s.width,
            };
            if s.routed {
                db.nets[net.index()].segments.push(seg);
            } else {
                db.add_fixed_segment(seg);
            }
        }

        for k in self.keepouts {
            let layer = match k.layer {
                Some(l) => Some(db.layer_index(&l)?),
                None => None,
            };
            db.add_keepout(layer, rect_of(k.rect));
        }

        for z in self.zones {
            let net = db.add_net(z.net);
            let layer = db.layer_index(&z.layer)?;
            db.add_zone(ZoneData {
                net,
                layer,
                outline: Polygon::new(z.outline.iter().map(|v| Point::new(v[0], v[1])).collect()),
                clearance: z.clearance,
                min_thickness: z.min_thickness,
                thermal: z.thermal,
                fill: None,
            });
        }

        for p in self.pairs {
            let pos = db.net_id(&p.positive)?;
            let neg = db.net_id(&p.negative)?;
            db.add_pair(p.name, pos, neg, p.gap)?;
        }

        Ok(db)
    }

    pub fn from_db(db: &BoardDB) -> Self {
        let layer = |l: u8| db.layers[l as usize].name.clone();
        let net = |n: NetId| db.net_name(n).to_string();

        let pads = db
            .pads
            .iter()
            .map(|p| PadEntry {
                ref_des: p.ref_des.clone(),
                pin: p.pin.clone(),
                net: net(p.net),
                at: [p.position.x, p.position.y],
                size: [p.width, p.height],
                layer: match p.layers {
                    PadLayers::Single(l) => Some(layer(l)),
                    PadLayers::Through => None,
                },
            })
            .collect();

        let via_entry = |v: &Via, routed: bool| ViaEntry {
            net: net(v.net),
            at: [v.position.x, v.position.y],
            drill: v.drill,
            diameter: v.diameter,
            from: layer(v.layers.0),
            to: layer(v.layers.1),
            routed,
        };
        let seg_entry = |s: &Segment, routed: bool| SegmentEntry {
            net: net(s.net),
            layer: layer(s.layer),
            start: [s.p1.x, s.p1.y],
            end: [s.p2.x, s.p2.y],
            width: s.width,
            routed,
        };

        let mut vias: Vec<ViaEntry> = db.fixed_vias.iter().map(|v| via_entry(v, false)).collect();
        let mut segments: Vec<SegmentEntry> = db
            .fixed_segments
            .iter()
            .map(|s| seg_entry(s, false))
            .collect();
        for n in &db.nets {
            vias.extend(n.vias.iter().map(|v| via_entry(v, true)));
            segments.extend(n.segments.iter().map(|s| seg_entry(s, true)));
        }

        let keepouts = db
            .keepouts
            .iter()
            .map(|k| KeepoutEntry {
                layer: k.layer.map(layer),
                rect: arr_of(&k.rect),
            })
            .collect();

        let zones = db
            .zones
            .iter()
            .map(|z| ZoneEntry {
                net: net(z.net),
                layer: layer(z.layer),
                outline: z.outline.vertices.iter().map(|v| [v.x, v.y]).collect(),
                clearance: z.clearance,
                min_thickness: z.min_thickness,
                thermal: z.thermal,
                filled_area: z.fill.as_ref().map(|f| f.area),
                fill: z
                    .fill
                    .as_ref()
                    .map(|f| f.runs.iter().map(arr_of).collect())
                    .unwrap_or_default(),
            })
            .collect();

        let pairs = db
            .pairs
            .iter()
            .map(|p| PairEntry {
                name: p.name.clone(),
                positive: net(p.positive),
                negative: net(p.negative),
                gap: p.gap,
            })
            .collect();

        BoardFile {
            board: BoardHeader {
                name: db.name.clone(),
                outline: arr_of(&db.outline),
                layers: db.layers.iter().map(|l| l.name.clone()).collect(),
            },
            pads,
            vias,
            segments,
            keepouts,
            zones,
            pairs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: &str = r#"
[board]
name = "demo"
outline = [0.0, 0.0, 20.0, 10.0]
layers = ["F.Cu", "B.Cu"]

[[pad]]
ref_des = "U1"
pin = "1"
net = "SIG"
at = [2.0, 5.0]
size = [0.6, 0.6]
layer = "F.Cu"

[[pad]]
ref_des = "J1"
pin = "1"
net = "SIG"
at = [18.0, 5.0]
size = [1.0, 1.0]

[[keepout]]
layer = "B.Cu"
rect = [8.0, 0.0, 9.0, 10.0]

[[zone]]
net = "GND"
layer = "B.Cu"
outline = [[0.0, 0.0], [20.0, 0.0], [20.0, 10.0], [0.0, 10.0]]
thermal = { gap = 0.3, spoke_width = 0.3, spoke_count = 4 }
"#;

    #[test]
    fn parses_pads_keepouts_and_zones() {
        let db = parse_str(BOARD).unwrap();
        assert_eq!(db.num_layers(), 2);
        assert_eq!(db.pads.len(), 2);
        assert_eq!(db.pads[0].layers, PadLayers::Single(0));
        assert_eq!(db.pads[1].layers, PadLayers::Through);
        assert_eq!(db.keepouts[0].layer, Some(1));
        assert_eq!(db.zones.len(), 1);
        assert_eq!(db.zones[0].thermal.unwrap().spoke_count, 4);
        assert!(db.validate().is_ok());
    }

    #[test]
    fn unknown_layer_is_rejected() {
        let bad = BOARD.replace("layer = \"F.Cu\"", "layer = \"In7.Cu\"");
        assert!(parse_str(&bad).is_err());
    }

    #[test]
    fn routed_copper_survives_a_rewrite() {
        let mut db = parse_str(BOARD).unwrap();
        let sig = db.net_id("SIG").unwrap();
        db.nets[sig.index()].segments.push(Segment {
            net: sig,
            layer: 0,
            p1: Point::new(2.0, 5.0),
            p2: Point::new(18.0, 5.0),
            width: 0.25,
        });
        let text = toml::to_string_pretty(&BoardFile::from_db(&db)).unwrap();
        let again = parse_str(&text).unwrap();
        let sig = again.net_id("SIG").unwrap();
        assert_eq!(again.nets[sig.index()].segments.len(), 1);
        assert!(again.fixed_segments.is_empty());
    }
}
