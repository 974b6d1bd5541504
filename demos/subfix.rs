//! Repair a raw `.sub` subchannel file and inspect disk images.
//!
//! ```text
//! subfix fix dump.sub fixed.sub --track 1:0:16799 --track 2:16800:33000:audio
//! subfix info disk.dmg
//! ```

use std::error::Error;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{info, warn};

use discsalvage::formats::diskcopy42::DiskCopy42;
use discsalvage::formats::udif::Udif;
use discsalvage::formats::vmware::Vmware;
use discsalvage::formats::MediaImage;
use discsalvage::output::RawSubchannelFile;
use discsalvage::subchannel::engine::SubchannelChunk;
use discsalvage::subchannel::log::{Sinks, StatusHandler, SubchannelLog, TextSubchannelLog};
use discsalvage::subchannel::{
    generate_subchannels, write_subchannel_to_image, RepairOptions, SubchannelMode,
    SubchannelState, SUBCHANNEL_SIZE,
};
use discsalvage::{Track, TrackLayout, TrackType};

/// Sectors processed per call to the repair engine
const CHUNK_SECTORS: usize = 64;

/// CD subchannel repair and disk image inspection
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Repair a raw subchannel file and synthesize what can't be repaired
    Fix {
        /// Interleaved subchannel, 96 bytes per sector starting at LBA 0
        input: PathBuf,
        /// Repaired subchannel
        output: PathBuf,
        /// Track as NUMBER:START:END[:audio|:data], may be repeated
        #[arg(short, long = "track", value_parser = parse_track, required = true)]
        tracks: Vec<Track>,
        /// Recompute the Q CRC when nothing else works
        #[arg(long)]
        fix_crc: bool,
        /// Don't synthesize the subchannel of unrepairable sectors
        #[arg(long)]
        no_generate: bool,
        /// Write a subchannel log
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Describe a DiskCopy 4.2, UDIF or VMware image
    Info {
        /// Image file
        image: PathBuf,
        /// Also verify the image checksums
        #[arg(long)]
        verify: bool,
    },
}

fn parse_track(s: &str) -> Result<Track, String> {
    let fields: Vec<&str> = s.split(':').collect();

    if fields.len() < 3 || fields.len() > 4 {
        return Err(format!("expected NUMBER:START:END[:TYPE], got {}", s));
    }

    let number = |f: &str| f.parse::<u64>().map_err(|e| format!("{}: {}", f, e));

    let track_type = match fields.get(3).copied() {
        None | Some("audio") => TrackType::Audio,
        Some("data") => TrackType::Mode1,
        Some(t) => return Err(format!("unknown track type {}", t)),
    };

    Ok(Track::new(
        number(fields[0])? as u32,
        1,
        number(fields[1])?,
        number(fields[2])?,
        track_type,
    ))
}

/// Logs progress every few thousand sectors
struct Progress;

impl StatusHandler for Progress {
    fn update_status(&mut self, msg: &str) {
        info!("{}", msg);
    }

    fn update_progress(&mut self, msg: &str, current: u64, total: u64) {
        if current % 4096 == 0 {
            info!("{} ({}/{})", msg, current, total);
        }
    }
}

fn fix(
    input: &Path,
    output: &Path,
    tracks: Vec<Track>,
    fix_crc: bool,
    generate: bool,
    log_path: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let data = fs::read(input)?;
    let sectors = data.len() / SUBCHANNEL_SIZE;

    if data.len() % SUBCHANNEL_SIZE != 0 {
        warn!("Ignoring {} trailing bytes", data.len() % SUBCHANNEL_SIZE);
    }

    let mut layout = TrackLayout::new(tracks)?;
    let mut state = SubchannelState::with_missing(0, sectors as i64);
    let mut out = RawSubchannelFile::new(File::create(output)?);

    let options = RepairOptions::default()
        .fix_position(true)
        .fix_content(true)
        .fix_crc(fix_crc);

    let mut sub_log = match log_path {
        Some(p) => Some(TextSubchannelLog::new(File::create(p)?)),
        None => None,
    };
    let mut dump_log: Vec<String> = Vec::new();
    let mut progress = Progress;

    let mut sinks = Sinks {
        subchannel: sub_log.as_mut().map(|l| l as &mut dyn SubchannelLog),
        dump: Some(&mut dump_log),
        status: Some(&mut progress),
    };

    for (n, chunk) in data.chunks(CHUNK_SECTORS * SUBCHANNEL_SIZE).enumerate() {
        let start = n * CHUNK_SECTORS;
        let current_track = layout
            .track_for_sector(start as i64)
            .map_or(1, |t| t.sequence as u8);

        let chunk = SubchannelChunk {
            supported: SubchannelMode::Raw,
            desired: SubchannelMode::Raw,
            data: chunk,
            start_sector: start as u64,
            count: (chunk.len() / SUBCHANNEL_SIZE) as u32,
            current_track,
        };

        let outcome =
            write_subchannel_to_image(&chunk, &mut layout, &mut state, &mut out, &options, &mut sinks)?;

        if !outcome.new_pregap_sectors.is_empty() {
            info!(
                "{} sectors moved to a pregap",
                outcome.new_pregap_sectors.len()
            );
        }
    }

    info!(
        "{} of {} sectors still missing a valid subchannel",
        state.missing.len(),
        sectors
    );

    if generate {
        let n = generate_subchannels(&mut state.missing, &layout, &mut out, &mut sinks)?;
        info!("Generated {} subchannels", n);
    }

    drop(sinks);

    out.into_inner()?;

    for line in &dump_log {
        println!("{}", line);
    }

    if let Some(mcn) = &state.mcn {
        println!("MCN: {}", mcn);
    }

    for (track, isrc) in &state.isrcs {
        println!("Track {:02} ISRC: {}", track, isrc);
    }

    for t in layout.tracks() {
        println!(
            "Track {:02}: {}-{} pregap {} indexes {:?}",
            t.sequence, t.start_sector, t.end_sector, t.pregap, t.indexes
        );
    }

    Ok(())
}

fn describe(image: &dyn MediaImage) {
    let info = image.info();

    println!("Format: {}", image.format_name());
    println!("Media: {:?}", info.media_type);
    println!("Sectors: {} x {} bytes", info.sectors, info.sector_size);
    println!(
        "Geometry: {}/{}/{}",
        info.cylinders, info.heads, info.sectors_per_track
    );

    if let Some(c) = &info.comments {
        println!("Comments: {}", c);
    }

    if !info.readable_tags.is_empty() {
        println!("Tags: {:?}", info.readable_tags);
    }
}

fn inspect(path: &Path, verify: bool) -> Result<(), Box<dyn Error>> {
    if DiskCopy42::identify(&mut File::open(path)?)? {
        let mut img = DiskCopy42::open(File::open(path)?)?;
        describe(&img);

        if verify {
            println!("Checksums: {}", if img.verify_media_image()? { "ok" } else { "BAD" });
        }
    } else if Udif::identify(&mut File::open(path)?)? {
        let mut img = Udif::open(File::open(path)?)?;
        describe(&img);

        if verify {
            match img.verify_media_image()? {
                Some(true) => println!("Checksum: ok"),
                Some(false) => println!("Checksum: BAD"),
                None => println!("Checksum: none"),
            }
        }
    } else if Vmware::identify(path)? {
        describe(&Vmware::open(path)?);
    } else {
        return Err(format!("{}: unknown image format", path.display()).into());
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fix {
            input,
            output,
            tracks,
            fix_crc,
            no_generate,
            log,
        } => fix(&input, &output, tracks, fix_crc, !no_generate, log.as_deref()),
        Commands::Info { image, verify } => inspect(&image, verify),
    }
}
