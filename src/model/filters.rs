use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub band: u8,
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeParams {
    pub volume: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BassBoostParams {
    /// Gain applied to the five lowest bands, clamped to -0.25..=1.0.
    pub level: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualizerParams {
    pub bands: Vec<EqBand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimescaleParams {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaraokeParams {
    pub level: f32,
    pub mono_level: f32,
    pub filter_band: f32,
    pub filter_width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveParams {
    pub frequency: f32,
    pub depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationParams {
    pub rotation_hz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistortionParams {
    pub sin_offset: f32,
    pub sin_scale: f32,
    pub cos_offset: f32,
    pub cos_scale: f32,
    pub tan_offset: f32,
    pub tan_scale: f32,
    pub offset: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowPassParams {
    pub smoothing: f32,
}

/// One audio filter together with its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "camelCase")]
pub enum Filter {
    Volume(VolumeParams),
    BassBoost(BassBoostParams),
    Equalizer(EqualizerParams),
    Timescale(TimescaleParams),
    Nightcore(TimescaleParams),
    Vaporwave(TimescaleParams),
    Karaoke(KaraokeParams),
    Tremolo(WaveParams),
    Vibrato(WaveParams),
    EightD(RotationParams),
    Distortion(DistortionParams),
    LowPass(LowPassParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterKind {
    Volume,
    BassBoost,
    Equalizer,
    Timescale,
    Nightcore,
    Vaporwave,
    Karaoke,
    Tremolo,
    Vibrato,
    EightD,
    Distortion,
    LowPass,
}

impl Filter {
    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::Volume(_) => FilterKind::Volume,
            Filter::BassBoost(_) => FilterKind::BassBoost,
            Filter::Equalizer(_) => FilterKind::Equalizer,
            Filter::Timescale(_) => FilterKind::Timescale,
            Filter::Nightcore(_) => FilterKind::Nightcore,
            Filter::Vaporwave(_) => FilterKind::Vaporwave,
            Filter::Karaoke(_) => FilterKind::Karaoke,
            Filter::Tremolo(_) => FilterKind::Tremolo,
            Filter::Vibrato(_) => FilterKind::Vibrato,
            Filter::EightD(_) => FilterKind::EightD,
            Filter::Distortion(_) => FilterKind::Distortion,
            Filter::LowPass(_) => FilterKind::LowPass,
        }
    }

    pub fn nightcore() -> Self {
        Filter::Nightcore(TimescaleParams {
            speed: 1.1,
            pitch: 1.125,
            rate: 1.05,
        })
    }

    pub fn vaporwave() -> Self {
        Filter::Vaporwave(TimescaleParams {
            speed: 0.85,
            pitch: 0.8,
            rate: 1.0,
        })
    }

    pub fn eight_d() -> Self {
        Filter::EightD(RotationParams { rotation_hz: 0.2 })
    }

    /// Writes this filter's contribution into a node payload.
    fn write_into(&self, out: &mut NodeFilters) {
        match self {
            Filter::Volume(p) => out.volume = Some(p.volume),
            Filter::BassBoost(p) => {
                let gain = p.level.clamp(-0.25, 1.0);
                for band in 0..5 {
                    merge_band(out, EqBand { band, gain });
                }
            }
            Filter::Equalizer(p) => {
                for band in &p.bands {
                    merge_band(out, *band);
                }
            }
            Filter::Timescale(p) | Filter::Nightcore(p) | Filter::Vaporwave(p) => {
                out.timescale = Some(*p)
            }
            Filter::Karaoke(p) => out.karaoke = Some(*p),
            Filter::Tremolo(p) => out.tremolo = Some(*p),
            Filter::Vibrato(p) => out.vibrato = Some(*p),
            Filter::EightD(p) => out.rotation = Some(*p),
            Filter::Distortion(p) => out.distortion = Some(*p),
            Filter::LowPass(p) => out.low_pass = Some(*p),
        }
    }
}

fn merge_band(out: &mut NodeFilters, band: EqBand) {
    let bands = out.equalizer.get_or_insert_with(Vec::new);
    match bands.iter_mut().find(|b| b.band == band.band) {
        Some(existing) => existing.gain = band.gain,
        None => bands.push(band),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub enabled: bool,
    pub filter: Filter,
}

/// Every filter a session has touched, with its enabled flag and last
/// parameters. Disabling keeps the parameters around.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    filters: Vec<FilterState>,
}

impl FilterSet {
    /// Enables `filter`, replacing the parameters of any filter of the same kind.
    pub fn apply(&mut self, filter: Filter) {
        let kind = filter.kind();
        match self.filters.iter_mut().find(|s| s.filter.kind() == kind) {
            Some(state) => {
                state.enabled = true;
                state.filter = filter;
            }
            None => {
                self.filters.push(FilterState {
                    enabled: true,
                    filter,
                });
                self.filters.sort_by_key(|s| s.filter.kind());
            }
        }
    }

    pub fn disable(&mut self, kind: FilterKind) {
        if let Some(state) = self.filters.iter_mut().find(|s| s.filter.kind() == kind) {
            state.enabled = false;
        }
    }

    pub fn clear(&mut self) {
        self.filters.iter_mut().for_each(|s| s.enabled = false);
    }

    pub fn is_enabled(&self, kind: FilterKind) -> bool {
        self.filters
            .iter()
            .any(|s| s.enabled && s.filter.kind() == kind)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter().filter(|s| s.enabled).map(|s| &s.filter)
    }

    pub fn states(&self) -> &[FilterState] {
        &self.filters
    }

    pub fn to_payload(&self) -> NodeFilters {
        let mut out = NodeFilters::default();
        for filter in self.enabled() {
            filter.write_into(&mut out);
        }
        out
    }
}

/// Filter body as the compute node expects it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqBand>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<KaraokeParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<TimescaleParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<WaveParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<WaveParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<DistortionParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPassParams>,
}
