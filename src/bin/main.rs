//! jpegexp CLI - JPEG 2000 / HTJ2K command-line front end.
//!
//! Thin wiring over the library's public API: reads/writes raw PGM/PPM pixel
//! planes and calls [`jpegexp_rs::encode`]/[`jpegexp_rs::decode`]. Not part of
//! the codec core, and free to be replaced by a host application.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use jpegexp_rs::config::{BlockCoder, ColorTransform, DecoderConfig, EncoderConfig, ProgressionOrder, WaveletFilter};
use jpegexp_rs::geometry::ImageGeometry;
use jpegexp_rs::image::Image;
use jpegexp_rs::marker::{self, MarkerSegment};
use jpegexp_rs::{io::ByteReader, J2kError};

/// JPEG 2000 / HTJ2K codec core command-line utility
#[derive(Parser)]
#[command(name = "jpegexp")]
#[command(author = "jpegexp-rs contributors")]
#[command(version)]
#[command(about = "Encode, decode, and inspect JPEG 2000 / HTJ2K codestreams", long_about = None)]
#[command(after_help = "EXAMPLES:
    jpegexp encode -i image.pgm -o image.j2k
    jpegexp encode -i image.ppm -o image.j2k --bpp 0.5 --filter irreversible-97 --coder ht
    jpegexp decode -i image.j2k -o image.ppm
    jpegexp info -i image.j2k")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a raw PGM/PPM image into a JPEG 2000 / HTJ2K codestream
    #[command(visible_alias = "e")]
    Encode {
        /// Input PGM (P5) or PPM (P6) file
        #[arg(short, long)]
        input: PathBuf,

        /// Output codestream path
        #[arg(short, long)]
        output: PathBuf,

        /// Number of DWT decomposition levels
        #[arg(long, default_value_t = 5)]
        levels: u8,

        /// Wavelet filter
        #[arg(long, default_value = "reversible-53", value_enum)]
        filter: FilterArg,

        /// Entropy coder: ebcot (Part 1) or ht (Part 15 / HTJ2K)
        #[arg(long, default_value = "ebcot", value_enum)]
        coder: BlockCoderArg,

        /// Number of quality layers
        #[arg(long, default_value_t = 1)]
        layers: u32,

        /// Target bits per pixel for the final layer (omit for lossless)
        #[arg(long)]
        bpp: Option<f64>,

        /// Progression order
        #[arg(long, default_value = "lrcp", value_enum)]
        progression: ProgressionArg,

        /// Code-block width (power of two)
        #[arg(long, default_value_t = 64)]
        code_block_width: u32,

        /// Code-block height (power of two)
        #[arg(long, default_value_t = 64)]
        code_block_height: u32,
    },

    /// Decode a JPEG 2000 / HTJ2K codestream to a PGM/PPM file
    #[command(visible_alias = "d")]
    Decode {
        /// Input codestream path
        #[arg(short, long)]
        input: PathBuf,

        /// Output PGM/PPM path
        #[arg(short, long)]
        output: PathBuf,

        /// Tolerate a codestream that ends mid-packet instead of erroring
        #[arg(long, default_value_t = true)]
        tolerant_truncation: bool,
    },

    /// Display codestream metadata (dimensions, tiling, coding style)
    #[command(visible_alias = "i")]
    Info {
        /// Input codestream path
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    #[value(name = "reversible-53")]
    Reversible53,
    #[value(name = "irreversible-97")]
    Irreversible97,
}

#[derive(Clone, Copy, ValueEnum)]
enum BlockCoderArg {
    Ebcot,
    Ht,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressionArg {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

impl From<ProgressionArg> for ProgressionOrder {
    fn from(p: ProgressionArg) -> Self {
        match p {
            ProgressionArg::Lrcp => ProgressionOrder::Lrcp,
            ProgressionArg::Rlcp => ProgressionOrder::Rlcp,
            ProgressionArg::Rpcl => ProgressionOrder::Rpcl,
            ProgressionArg::Pcrl => ProgressionOrder::Pcrl,
            ProgressionArg::Cprl => ProgressionOrder::Cprl,
        }
    }
}

fn main() -> std::process::ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            levels,
            filter,
            coder,
            layers,
            bpp,
            progression,
            code_block_width,
            code_block_height,
        } => encode_command(
            &input,
            &output,
            levels,
            filter,
            coder,
            layers,
            bpp,
            progression,
            code_block_width,
            code_block_height,
        ),
        Commands::Decode {
            input,
            output,
            tolerant_truncation,
        } => decode_command(&input, &output, tolerant_truncation),
        Commands::Info { input } => info_command(&input),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn read_input_error(e: std::io::Error) -> J2kError {
    J2kError::InvalidInput(format!("failed to read input file: {e}"))
}

fn write_output_error(e: std::io::Error) -> J2kError {
    J2kError::InvalidInput(format!("failed to write output file: {e}"))
}

#[allow(clippy::too_many_arguments)]
fn encode_command(
    input: &PathBuf,
    output: &PathBuf,
    levels: u8,
    filter: FilterArg,
    coder: BlockCoderArg,
    layers: u32,
    bpp: Option<f64>,
    progression: ProgressionArg,
    code_block_width: u32,
    code_block_height: u32,
) -> Result<(), J2kError> {
    let data = fs::read(input).map_err(read_input_error)?;
    let pnm = jpegexp_rs::pnm::read(&data)?;

    let (filter, color_transform) = match filter {
        FilterArg::Reversible53 => (WaveletFilter::Reversible53, ColorTransform::Reversible),
        FilterArg::Irreversible97 => (WaveletFilter::Irreversible97, ColorTransform::Irreversible),
    };
    let color_transform = if pnm.planes.len() == 3 { color_transform } else { ColorTransform::None };
    let block_coder = match coder {
        BlockCoderArg::Ebcot => BlockCoder::Ebcot,
        BlockCoderArg::Ht => BlockCoder::Ht,
    };

    let mut builder = EncoderConfig::builder()
        .dwt_levels(levels)
        .filter(filter)
        .color_transform(color_transform)
        .block_coder(block_coder)
        .num_layers(layers)
        .progression(progression.into())
        .code_block_width(code_block_width)
        .code_block_height(code_block_height);
    if let Some(bpp) = bpp {
        builder = builder.target_bpp(bpp);
    }
    let config = builder.build()?;

    let bit_depth = if pnm.max_value > 255 { 16 } else { 8 };
    let geometry = ImageGeometry::from_config(pnm.width, pnm.height, &config);
    let image = Image::new(geometry, bit_depth, false, color_transform, pnm.planes);

    let codestream = jpegexp_rs::encode(&image, &config)?;
    fs::write(output, &codestream).map_err(write_output_error)?;

    println!("encoded {}x{} ({} component(s)) -> {} bytes", image.geometry.width, image.geometry.height, image.num_components(), codestream.len());
    Ok(())
}

fn decode_command(input: &PathBuf, output: &PathBuf, tolerant_truncation: bool) -> Result<(), J2kError> {
    let data = fs::read(input).map_err(read_input_error)?;
    let config = DecoderConfig {
        tolerant_truncation,
        ..DecoderConfig::default()
    };
    let image = jpegexp_rs::decode(&data, &config)?;

    let max_value = (if image.bit_depth > 8 { (1u32 << image.bit_depth) - 1 } else { 255 }) as u16;
    let mut file = fs::File::create(output).map_err(write_output_error)?;
    jpegexp_rs::pnm::write(&mut file, image.geometry.width, image.geometry.height, max_value, &image.components)?;

    println!("decoded {}x{} ({} component(s)) -> {:?}", image.geometry.width, image.geometry.height, image.num_components(), output);
    Ok(())
}

fn info_command(input: &PathBuf) -> Result<(), J2kError> {
    let data = fs::read(input).map_err(read_input_error)?;
    let mut reader = ByteReader::new(&data);
    let segments = marker::read_main_header(&mut reader)?;

    for segment in &segments {
        match segment {
            MarkerSegment::Siz(siz) => {
                println!("size: {}x{} ({} component(s))", siz.width, siz.height, siz.components.len());
                println!("tile size: {}x{}", siz.tile_width, siz.tile_height);
                for (i, c) in siz.components.iter().enumerate() {
                    println!("  component {i}: {} bits{}", c.bit_depth, if c.signed { " (signed)" } else { "" });
                }
            }
            MarkerSegment::Cod(cod) => {
                println!("decomposition levels: {}", cod.style.decomposition_levels);
                println!("code-block size: {}x{}", 1u32 << (cod.style.code_block_width_exp as u32 + 2), 1u32 << (cod.style.code_block_height_exp as u32 + 2));
                println!("filter: {}", if cod.style.filter == 1 { "reversible 5/3" } else { "irreversible 9/7" });
                println!("quality layers: {}", cod.num_layers);
                println!("block coder: {}", if cod.style.uses_ht() { "HTJ2K (Part 15)" } else { "EBCOT (Part 1)" });
            }
            MarkerSegment::Cap(cap) => {
                println!("HT capability flag: {}", cap.ht_enabled);
            }
            _ => {}
        }
    }
    Ok(())
}
