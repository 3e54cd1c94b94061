//! Codestream marker segments (§4.K): SOC/SIZ/COD/COC/QCD/QCC/CAP/CPF/COM in
//! the main header, SOT/SOD bracketing each tile-part, EOC at the end.
//!
//! Grounded on the teacher's `parser.rs`, which parsed SIZ/COD/QCD/CAP but
//! left COC, QCC, and COM unimplemented and read step sizes/precinct counts
//! with several off-by-one TODOs; this module completes that set and
//! replaces the ad hoc length bookkeeping with a length check every segment
//! enforces on itself.

use crate::error::{J2kError, Result};
use crate::io::{ByteReader, ByteWriter};

pub mod code {
    pub const SOC: u16 = 0xFF4F;
    pub const CAP: u16 = 0xFF50;
    pub const SIZ: u16 = 0xFF51;
    pub const COD: u16 = 0xFF52;
    pub const COC: u16 = 0xFF53;
    pub const CPF: u16 = 0xFF59;
    pub const QCD: u16 = 0xFF5C;
    pub const QCC: u16 = 0xFF5D;
    pub const COM: u16 = 0xFF64;
    pub const SOT: u16 = 0xFF90;
    pub const SOD: u16 = 0xFF93;
    pub const EOC: u16 = 0xFFD9;
}

fn write_segment(out: &mut ByteWriter, marker: u16, payload: &[u8]) -> Result<()> {
    let len = payload.len() + 2;
    if len > u16::MAX as usize {
        return Err(J2kError::InvalidInput(format!("marker 0x{marker:04X} payload too large for a 16-bit length field")));
    }
    out.write_u16(marker);
    out.write_u16(len as u16);
    out.write_bytes(payload);
    Ok(())
}

/// Reads a segment's declared length and returns a sub-reader scoped to
/// exactly that many payload bytes, so a parser that reads less than it
/// declared is caught rather than silently drifting into the next segment.
fn scoped_payload<'a>(r: &mut ByteReader<'a>, context: &str) -> Result<ByteReader<'a>> {
    let len = r.read_u16()? as usize;
    if len < 2 {
        return Err(J2kError::invalid_codestream(context, "segment length shorter than the length field itself"));
    }
    let payload = r.read_bytes(len - 2)?;
    Ok(ByteReader::new(payload))
}

fn finish_scoped(scoped: ByteReader<'_>, context: &str) -> Result<()> {
    if scoped.remaining_len() != 0 {
        return Err(J2kError::invalid_codestream(context, "trailing bytes in segment not consumed by its fields"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSiz {
    pub bit_depth: u8,
    pub signed: bool,
    pub x_sub: u8,
    pub y_sub: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Siz {
    pub rsiz: u16,
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_x_offset: u32,
    pub tile_y_offset: u32,
    pub components: Vec<ComponentSiz>,
}

pub fn write_siz(out: &mut ByteWriter, siz: &Siz) -> Result<()> {
    if siz.components.len() > u16::MAX as usize {
        return Err(J2kError::InvalidInput("component count exceeds Csiz's 16-bit field".into()));
    }
    let mut p = ByteWriter::new();
    p.write_u16(siz.rsiz);
    p.write_u32(siz.width);
    p.write_u32(siz.height);
    p.write_u32(siz.x_offset);
    p.write_u32(siz.y_offset);
    p.write_u32(siz.tile_width);
    p.write_u32(siz.tile_height);
    p.write_u32(siz.tile_x_offset);
    p.write_u32(siz.tile_y_offset);
    p.write_u16(siz.components.len() as u16);
    for c in &siz.components {
        let depth_byte = ((c.bit_depth - 1) & 0x7F) | if c.signed { 0x80 } else { 0 };
        p.write_u8(depth_byte);
        p.write_u8(c.x_sub);
        p.write_u8(c.y_sub);
    }
    write_segment(out, code::SIZ, p.as_slice())
}

pub fn read_siz(r: &mut ByteReader) -> Result<Siz> {
    let mut p = scoped_payload(r, "SIZ")?;
    let rsiz = p.read_u16()?;
    let width = p.read_u32()?;
    let height = p.read_u32()?;
    let x_offset = p.read_u32()?;
    let y_offset = p.read_u32()?;
    let tile_width = p.read_u32()?;
    let tile_height = p.read_u32()?;
    let tile_x_offset = p.read_u32()?;
    let tile_y_offset = p.read_u32()?;
    let num_components = p.read_u16()?;
    let mut components = Vec::with_capacity(num_components as usize);
    for _ in 0..num_components {
        let depth_byte = p.read_u8()?;
        let bit_depth = (depth_byte & 0x7F) + 1;
        let signed = (depth_byte & 0x80) != 0;
        let x_sub = p.read_u8()?;
        let y_sub = p.read_u8()?;
        components.push(ComponentSiz { bit_depth, signed, x_sub, y_sub });
    }
    finish_scoped(p, "SIZ")?;
    Ok(Siz {
        rsiz,
        width,
        height,
        x_offset,
        y_offset,
        tile_width,
        tile_height,
        tile_x_offset,
        tile_y_offset,
        components,
    })
}

/// The SPcod/SPcoc payload shape shared by COD and COC.
#[derive(Debug, Clone, PartialEq)]
pub struct CodingStyle {
    pub decomposition_levels: u8,
    /// Stored as the ISO exponent-minus-2 form; width = `1 << (exp + 2)`.
    pub code_block_width_exp: u8,
    pub code_block_height_exp: u8,
    /// Bit 6 selects the HT (Part 15) block coder.
    pub code_block_style: u8,
    /// 0 = 9/7 irreversible, 1 = 5/3 reversible.
    pub filter: u8,
    pub precinct_sizes: Option<Vec<u8>>,
}

impl CodingStyle {
    fn write(&self, p: &mut ByteWriter) {
        p.write_u8(self.decomposition_levels);
        p.write_u8(self.code_block_width_exp);
        p.write_u8(self.code_block_height_exp);
        p.write_u8(self.code_block_style);
        p.write_u8(self.filter);
        if let Some(sizes) = &self.precinct_sizes {
            for &s in sizes {
                p.write_u8(s);
            }
        }
    }

    fn read(p: &mut ByteReader, user_defined_precincts: bool) -> Result<Self> {
        let decomposition_levels = p.read_u8()?;
        let code_block_width_exp = p.read_u8()?;
        let code_block_height_exp = p.read_u8()?;
        let code_block_style = p.read_u8()?;
        let filter = p.read_u8()?;
        let precinct_sizes = if user_defined_precincts {
            let count = decomposition_levels as usize + 1;
            let mut sizes = Vec::with_capacity(count);
            for _ in 0..count {
                sizes.push(p.read_u8()?);
            }
            Some(sizes)
        } else {
            None
        };
        Ok(Self {
            decomposition_levels,
            code_block_width_exp,
            code_block_height_exp,
            code_block_style,
            filter,
            precinct_sizes,
        })
    }

    pub fn uses_ht(&self) -> bool {
        self.code_block_style & 0x40 != 0
    }

    pub fn user_defined_precincts(&self) -> bool {
        self.precinct_sizes.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cod {
    pub scod: u8,
    pub progression_order: u8,
    pub num_layers: u16,
    pub mct: u8,
    pub style: CodingStyle,
}

impl Cod {
    pub fn user_defined_precincts(&self) -> bool {
        self.scod & 0x01 != 0
    }
}

pub fn write_cod(out: &mut ByteWriter, cod: &Cod) -> Result<()> {
    let mut p = ByteWriter::new();
    p.write_u8(cod.scod);
    p.write_u8(cod.progression_order);
    p.write_u16(cod.num_layers);
    p.write_u8(cod.mct);
    cod.style.write(&mut p);
    write_segment(out, code::COD, p.as_slice())
}

pub fn read_cod(r: &mut ByteReader) -> Result<Cod> {
    let mut p = scoped_payload(r, "COD")?;
    let scod = p.read_u8()?;
    let progression_order = p.read_u8()?;
    let num_layers = p.read_u16()?;
    let mct = p.read_u8()?;
    let style = CodingStyle::read(&mut p, scod & 0x01 != 0)?;
    finish_scoped(p, "COD")?;
    Ok(Cod {
        scod,
        progression_order,
        num_layers,
        mct,
        style,
    })
}

/// Per-component override of COD's SPcod (progression order, layer count,
/// and MCT flag stay codestream-global and are not repeated here).
#[derive(Debug, Clone, PartialEq)]
pub struct Coc {
    pub component: u8,
    pub scoc: u8,
    pub style: CodingStyle,
}

pub fn write_coc(out: &mut ByteWriter, coc: &Coc) -> Result<()> {
    let mut p = ByteWriter::new();
    p.write_u8(coc.component);
    p.write_u8(coc.scoc);
    coc.style.write(&mut p);
    write_segment(out, code::COC, p.as_slice())
}

pub fn read_coc(r: &mut ByteReader) -> Result<Coc> {
    let mut p = scoped_payload(r, "COC")?;
    let component = p.read_u8()?;
    let scoc = p.read_u8()?;
    let style = CodingStyle::read(&mut p, scoc & 0x01 != 0)?;
    finish_scoped(p, "COC")?;
    Ok(Coc { component, scoc, style })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantStepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

fn write_steps(p: &mut ByteWriter, sqcd: u8, steps: &[QuantStepSize]) {
    let expounded = sqcd & 0x1F == 0x02;
    for s in steps {
        if expounded {
            p.write_u16(((s.exponent as u16) << 11) | (s.mantissa & 0x07FF));
        } else {
            p.write_u8(s.exponent << 3);
        }
    }
}

fn read_steps(p: &mut ByteReader, sqcd: u8) -> Result<Vec<QuantStepSize>> {
    let expounded = sqcd & 0x1F == 0x02;
    let mut steps = Vec::new();
    while p.remaining_len() > 0 {
        if expounded {
            let raw = p.read_u16()?;
            steps.push(QuantStepSize {
                exponent: (raw >> 11) as u8,
                mantissa: raw & 0x07FF,
            });
        } else {
            let raw = p.read_u8()?;
            steps.push(QuantStepSize { exponent: raw >> 3, mantissa: 0 });
        }
    }
    Ok(steps)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Qcd {
    pub sqcd: u8,
    pub steps: Vec<QuantStepSize>,
}

impl Qcd {
    pub fn guard_bits(&self) -> u8 {
        self.sqcd >> 5
    }
}

pub fn write_qcd(out: &mut ByteWriter, qcd: &Qcd) -> Result<()> {
    let mut p = ByteWriter::new();
    p.write_u8(qcd.sqcd);
    write_steps(&mut p, qcd.sqcd, &qcd.steps);
    write_segment(out, code::QCD, p.as_slice())
}

pub fn read_qcd(r: &mut ByteReader) -> Result<Qcd> {
    let mut p = scoped_payload(r, "QCD")?;
    let sqcd = p.read_u8()?;
    let steps = read_steps(&mut p, sqcd)?;
    finish_scoped(p, "QCD")?;
    Ok(Qcd { sqcd, steps })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Qcc {
    pub component: u8,
    pub sqcc: u8,
    pub steps: Vec<QuantStepSize>,
}

pub fn write_qcc(out: &mut ByteWriter, qcc: &Qcc) -> Result<()> {
    let mut p = ByteWriter::new();
    p.write_u8(qcc.component);
    p.write_u8(qcc.sqcc);
    write_steps(&mut p, qcc.sqcc, &qcc.steps);
    write_segment(out, code::QCC, p.as_slice())
}

pub fn read_qcc(r: &mut ByteReader) -> Result<Qcc> {
    let mut p = scoped_payload(r, "QCC")?;
    let component = p.read_u8()?;
    let sqcc = p.read_u8()?;
    let steps = read_steps(&mut p, sqcc)?;
    finish_scoped(p, "QCC")?;
    Ok(Qcc { component, sqcc, steps })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Com {
    pub registration: u16,
    pub data: Vec<u8>,
}

pub fn write_com(out: &mut ByteWriter, com: &Com) -> Result<()> {
    let mut p = ByteWriter::new();
    p.write_u16(com.registration);
    p.write_bytes(&com.data);
    write_segment(out, code::COM, p.as_slice())
}

pub fn read_com(r: &mut ByteReader) -> Result<Com> {
    let mut p = scoped_payload(r, "COM")?;
    let registration = p.read_u16()?;
    let data = p.read_bytes(p.remaining_len())?.to_vec();
    finish_scoped(p, "COM")?;
    Ok(Com { registration, data })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cap {
    pub pcap: u32,
    pub ht_enabled: bool,
}

pub fn write_cap(out: &mut ByteWriter, cap: &Cap) -> Result<()> {
    let mut p = ByteWriter::new();
    let pcap = if cap.ht_enabled { cap.pcap | 0x0000_8000 } else { cap.pcap };
    p.write_u32(pcap);
    write_segment(out, code::CAP, p.as_slice())
}

pub fn read_cap(r: &mut ByteReader) -> Result<Cap> {
    let mut p = scoped_payload(r, "CAP")?;
    let pcap = p.read_u32()?;
    finish_scoped(p, "CAP")?;
    Ok(Cap { pcap, ht_enabled: pcap & 0x0000_8000 != 0 })
}

/// HT profile declaration (Part 15): 0 = reversible-only HT, 1 = full HT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cpf {
    pub profile: u16,
}

pub fn write_cpf(out: &mut ByteWriter, cpf: &Cpf) -> Result<()> {
    let mut p = ByteWriter::new();
    p.write_u16(cpf.profile);
    write_segment(out, code::CPF, p.as_slice())
}

pub fn read_cpf(r: &mut ByteReader) -> Result<Cpf> {
    let mut p = scoped_payload(r, "CPF")?;
    let profile = p.read_u16()?;
    finish_scoped(p, "CPF")?;
    Ok(Cpf { profile })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sot {
    pub tile_index: u16,
    pub tile_part_length: u32,
    pub tile_part_index: u8,
    pub tile_part_count: u8,
}

pub fn write_sot(out: &mut ByteWriter, sot: &Sot) -> Result<()> {
    let mut p = ByteWriter::new();
    p.write_u16(sot.tile_index);
    p.write_u32(sot.tile_part_length);
    p.write_u8(sot.tile_part_index);
    p.write_u8(sot.tile_part_count);
    write_segment(out, code::SOT, p.as_slice())
}

/// Patches a previously written SOT's Psot field once the tile-part's total
/// byte length is known, mirroring the teacher writer's deferred-length
/// pattern but driven by [`ByteWriter::patch_u32`] instead of a second pass.
pub fn patch_sot_length(out: &mut ByteWriter, sot_marker_offset: usize, tile_part_length: u32) {
    // marker(2) + length(2) + Isot(2) = 6 bytes in before Psot.
    out.patch_u32(sot_marker_offset + 6, tile_part_length);
}

pub fn read_sot(r: &mut ByteReader) -> Result<Sot> {
    let mut p = scoped_payload(r, "SOT")?;
    let tile_index = p.read_u16()?;
    let tile_part_length = p.read_u32()?;
    let tile_part_index = p.read_u8()?;
    let tile_part_count = p.read_u8()?;
    finish_scoped(p, "SOT")?;
    Ok(Sot {
        tile_index,
        tile_part_length,
        tile_part_index,
        tile_part_count,
    })
}

/// One parsed main-header segment, in encounter order.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerSegment {
    Siz(Siz),
    Cod(Cod),
    Coc(Coc),
    Qcd(Qcd),
    Qcc(Qcc),
    Com(Com),
    Cap(Cap),
    Cpf(Cpf),
}

/// Parses SOC followed by main-header segments until SOT, per the ordering
/// `SOC SIZ [CAP] [CPF] COD [COC…] QCD [QCC…] [COM…]`. Leaves the reader
/// positioned exactly at the SOT marker (not consumed), so the caller reads
/// it with `read_u16` and [`read_sot`] like any other segment.
pub fn read_main_header(r: &mut ByteReader) -> Result<Vec<MarkerSegment>> {
    if r.read_u16()? != code::SOC {
        return Err(J2kError::invalid_codestream("main-header", "codestream does not begin with SOC"));
    }
    let mut segments = Vec::new();
    let mut seen_siz = false;
    let mut seen_cod = false;

    loop {
        let remaining = r.remaining();
        if remaining.len() < 2 {
            return Err(J2kError::invalid_codestream("main-header", "codestream ends before SOT"));
        }
        let marker = u16::from_be_bytes([remaining[0], remaining[1]]);
        if marker == code::SOT {
            break;
        }
        r.advance(2)?;
        match marker {
            code::SIZ => {
                segments.push(MarkerSegment::Siz(read_siz(r)?));
                seen_siz = true;
            }
            code::COD => {
                if !seen_siz {
                    return Err(J2kError::invalid_codestream("main-header", "COD encountered before SIZ"));
                }
                segments.push(MarkerSegment::Cod(read_cod(r)?));
                seen_cod = true;
            }
            code::COC => segments.push(MarkerSegment::Coc(read_coc(r)?)),
            code::QCD => segments.push(MarkerSegment::Qcd(read_qcd(r)?)),
            code::QCC => segments.push(MarkerSegment::Qcc(read_qcc(r)?)),
            code::COM => segments.push(MarkerSegment::Com(read_com(r)?)),
            code::CAP => segments.push(MarkerSegment::Cap(read_cap(r)?)),
            code::CPF => segments.push(MarkerSegment::Cpf(read_cpf(r)?)),
            _ => return Err(J2kError::invalid_codestream("main-header", format!("unexpected marker 0x{marker:04X} before SOT"))),
        }
        if !seen_siz {
            return Err(J2kError::invalid_codestream("main-header", "SIZ must immediately follow SOC"));
        }
    }

    if !seen_cod {
        return Err(J2kError::invalid_codestream("main-header", "main header has no COD segment"));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_siz() -> Siz {
        Siz {
            rsiz: 0,
            width: 512,
            height: 256,
            x_offset: 0,
            y_offset: 0,
            tile_width: 512,
            tile_height: 256,
            tile_x_offset: 0,
            tile_y_offset: 0,
            components: vec![
                ComponentSiz { bit_depth: 8, signed: false, x_sub: 1, y_sub: 1 },
                ComponentSiz { bit_depth: 8, signed: false, x_sub: 1, y_sub: 1 },
                ComponentSiz { bit_depth: 8, signed: false, x_sub: 1, y_sub: 1 },
            ],
        }
    }

    fn sample_style(precincts: bool) -> CodingStyle {
        CodingStyle {
            decomposition_levels: 5,
            code_block_width_exp: 4,
            code_block_height_exp: 4,
            code_block_style: 0,
            filter: 1,
            precinct_sizes: if precincts { Some(vec![0x77; 6]) } else { None },
        }
    }

    #[test]
    fn siz_round_trips() {
        let siz = sample_siz();
        let mut w = ByteWriter::new();
        write_siz(&mut w, &siz).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), code::SIZ);
        let parsed = read_siz(&mut r).unwrap();
        assert_eq!(parsed, siz);
    }

    #[test]
    fn cod_round_trips_with_default_precincts() {
        let cod = Cod {
            scod: 0,
            progression_order: 0,
            num_layers: 4,
            mct: 1,
            style: sample_style(false),
        };
        let mut w = ByteWriter::new();
        write_cod(&mut w, &cod).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        assert_eq!(read_cod(&mut r).unwrap(), cod);
    }

    #[test]
    fn cod_round_trips_with_user_precincts() {
        let cod = Cod {
            scod: 0x01,
            progression_order: 2,
            num_layers: 1,
            mct: 0,
            style: sample_style(true),
        };
        let mut w = ByteWriter::new();
        write_cod(&mut w, &cod).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        assert_eq!(read_cod(&mut r).unwrap(), cod);
    }

    #[test]
    fn coc_round_trips() {
        let coc = Coc { component: 2, scoc: 0, style: sample_style(false) };
        let mut w = ByteWriter::new();
        write_coc(&mut w, &coc).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        assert_eq!(read_coc(&mut r).unwrap(), coc);
    }

    #[test]
    fn qcd_round_trips_expounded_steps() {
        let qcd = Qcd {
            sqcd: (2 << 5) | 0x02,
            steps: vec![QuantStepSize { exponent: 13, mantissa: 200 }, QuantStepSize { exponent: 12, mantissa: 513 }],
        };
        let mut w = ByteWriter::new();
        write_qcd(&mut w, &qcd).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        assert_eq!(read_qcd(&mut r).unwrap(), qcd);
    }

    #[test]
    fn qcd_round_trips_reversible_steps() {
        let qcd = Qcd {
            sqcd: (2 << 5) | 0x00,
            steps: vec![QuantStepSize { exponent: 0, mantissa: 0 }, QuantStepSize { exponent: 1, mantissa: 0 }],
        };
        let mut w = ByteWriter::new();
        write_qcd(&mut w, &qcd).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        let parsed = read_qcd(&mut r).unwrap();
        assert_eq!(parsed.steps.len(), qcd.steps.len());
        assert_eq!(parsed.guard_bits(), 2);
    }

    #[test]
    fn qcc_round_trips() {
        let qcc = Qcc {
            component: 1,
            sqcc: (3 << 5) | 0x02,
            steps: vec![QuantStepSize { exponent: 10, mantissa: 1000 }],
        };
        let mut w = ByteWriter::new();
        write_qcc(&mut w, &qcc).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        assert_eq!(read_qcc(&mut r).unwrap(), qcc);
    }

    #[test]
    fn com_round_trips_text_payload() {
        let com = Com { registration: 1, data: b"jpeg2000 rust core".to_vec() };
        let mut w = ByteWriter::new();
        write_com(&mut w, &com).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        assert_eq!(read_com(&mut r).unwrap(), com);
    }

    #[test]
    fn cap_round_trips_ht_flag() {
        let cap = Cap { pcap: 0, ht_enabled: true };
        let mut w = ByteWriter::new();
        write_cap(&mut w, &cap).unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        let parsed = read_cap(&mut r).unwrap();
        assert!(parsed.ht_enabled);
    }

    #[test]
    fn sot_round_trips_and_patches_length() {
        let mut w = ByteWriter::new();
        let offset = w.position();
        write_sot(
            &mut w,
            &Sot {
                tile_index: 3,
                tile_part_length: 0,
                tile_part_index: 0,
                tile_part_count: 1,
            },
        )
        .unwrap();
        patch_sot_length(&mut w, offset, 12345);
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        r.read_u16().unwrap();
        let sot = read_sot(&mut r).unwrap();
        assert_eq!(sot.tile_index, 3);
        assert_eq!(sot.tile_part_length, 12345);
    }

    #[test]
    fn main_header_rejects_cod_before_siz() {
        let mut w = ByteWriter::new();
        w.write_u16(code::SOC);
        write_cod(
            &mut w,
            &Cod {
                scod: 0,
                progression_order: 0,
                num_layers: 1,
                mct: 0,
                style: sample_style(false),
            },
        )
        .unwrap();
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        assert!(read_main_header(&mut r).is_err());
    }

    #[test]
    fn main_header_parses_full_set_and_stops_before_sot() {
        let mut w = ByteWriter::new();
        w.write_u16(code::SOC);
        write_siz(&mut w, &sample_siz()).unwrap();
        write_cod(
            &mut w,
            &Cod {
                scod: 0,
                progression_order: 0,
                num_layers: 1,
                mct: 1,
                style: sample_style(false),
            },
        )
        .unwrap();
        write_qcd(&mut w, &Qcd { sqcd: 2 << 5, steps: vec![QuantStepSize { exponent: 4, mantissa: 0 }] }).unwrap();
        write_com(&mut w, &Com { registration: 1, data: b"hi".to_vec() }).unwrap();
        w.write_u16(code::SOT);
        let data = w.into_vec();
        let mut r = ByteReader::new(&data);
        let segments = read_main_header(&mut r).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(r.read_u16().unwrap(), code::SOT);
    }
}
