//! Logging sinks used while dumping.
//!
//! All of them are optional: every method has an empty default body
//! and the engine only ever talks to them through an `Option`.

use std::io::Write;

use crate::msf::Msf;

use super::repair::QFix;
use super::{deinterleave, PChannel, QBlock, rw_quiet, CHANNEL_SIZE, Q16_SIZE, SUBCHANNEL_SIZE};

/// Forensic log of every subchannel block read, generated or repaired
pub trait SubchannelLog {
    /// Log `count` sectors of subchannel starting at `lba`. `is_raw`
    /// tells whether `data` holds 96-byte interleaved blocks or 16-byte
    /// Q-only ones.
    fn write_entry(
        &mut self,
        _data: &[u8],
        _is_raw: bool,
        _lba: i64,
        _count: u32,
        _generated: bool,
        _fixed: bool,
    ) {
    }

    /// The P channel at `lba` was rewritten
    fn write_p_fix(&mut self, _lba: i64) {}
    /// The R-W channels at `lba` were cleared
    fn write_rw_fix(&mut self, _lba: i64) {}
    /// The Q ADR at `lba` was fixed
    fn write_q_adr_fix(&mut self, _lba: i64) {}
    /// The Q control nibble at `lba` was fixed
    fn write_q_ctrl_fix(&mut self, _lba: i64) {}
    /// The Q zero byte at `lba` was cleared
    fn write_q_zero_fix(&mut self, _lba: i64) {}
    /// The Q track number at `lba` was fixed
    fn write_q_tno_fix(&mut self, _lba: i64) {}
    /// The Q index at `lba` was fixed
    fn write_q_index_fix(&mut self, _lba: i64) {}
    /// The Q relative position at `lba` was fixed
    fn write_q_rel_pos_fix(&mut self, _lba: i64) {}
    /// The Q absolute position at `lba` was fixed
    fn write_q_abs_pos_fix(&mut self, _lba: i64) {}
    /// The Q CRC at `lba` was recomputed
    fn write_q_crc_fix(&mut self, _lba: i64) {}
    /// The Q MCN at `lba` was rewritten
    fn write_q_mcn_fix(&mut self, _lba: i64) {}
    /// The Q ISRC at `lba` was rewritten
    fn write_q_isrc_fix(&mut self, _lba: i64) {}

    /// Log every Q correction in `flags`
    fn write_q_fixes(&mut self, lba: i64, flags: QFix) {
        if flags.contains(QFix::ADR) {
            self.write_q_adr_fix(lba);
        }
        if flags.contains(QFix::CONTROL) {
            self.write_q_ctrl_fix(lba);
        }
        if flags.contains(QFix::ZERO) {
            self.write_q_zero_fix(lba);
        }
        if flags.contains(QFix::TNO) {
            self.write_q_tno_fix(lba);
        }
        if flags.contains(QFix::INDEX) {
            self.write_q_index_fix(lba);
        }
        if flags.contains(QFix::REL_POS) {
            self.write_q_rel_pos_fix(lba);
        }
        if flags.contains(QFix::ABS_POS) {
            self.write_q_abs_pos_fix(lba);
        }
        if flags.contains(QFix::CRC) {
            self.write_q_crc_fix(lba);
        }
        if flags.contains(QFix::MCN) {
            self.write_q_mcn_fix(lba);
        }
        if flags.contains(QFix::ISRC) {
            self.write_q_isrc_fix(lba);
        }
    }
}

/// Human readable dump log
pub trait DumpLog {
    /// Append a line to the log
    fn write_line(&mut self, _line: &str) {}
}

impl DumpLog for Vec<String> {
    fn write_line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Status and progress reporting
pub trait StatusHandler {
    /// One-off status message
    fn update_status(&mut self, _msg: &str) {}
    /// A long operation starts
    fn init_progress(&mut self) {}
    /// Progress of the current operation
    fn update_progress(&mut self, _msg: &str, _current: u64, _total: u64) {}
    /// The long operation is over
    fn end_progress(&mut self) {}
}

/// Optional logging sinks handed to the engine
#[derive(Default)]
pub struct Sinks<'a> {
    /// Subchannel log
    pub subchannel: Option<&'a mut dyn SubchannelLog>,
    /// Dump log
    pub dump: Option<&'a mut dyn DumpLog>,
    /// Status handler
    pub status: Option<&'a mut dyn StatusHandler>,
}

impl<'a> Sinks<'a> {
    /// No logging at all
    pub fn none() -> Sinks<'a> {
        Sinks::default()
    }

    /// Write `line` to the dump log and mirror it to the `log` facade
    pub fn dump_line(&mut self, line: &str) {
        log::info!("{}", line);

        if let Some(d) = self.dump.as_mut() {
            d.write_line(line);
        }
    }

    /// Send a status message
    pub fn status(&mut self, msg: &str) {
        if let Some(s) = self.status.as_mut() {
            s.update_status(msg);
        }
    }

    /// Access the subchannel log, if any
    pub fn subchannel(&mut self) -> Option<&mut (dyn SubchannelLog + 'a)> {
        self.subchannel.as_deref_mut()
    }
}

/// Subchannel log writing one line per sector or correction
pub struct TextSubchannelLog<W> {
    out: W,
    failed: bool,
}

impl<W: Write> TextSubchannelLog<W> {
    /// Create a log writing to `out`
    pub fn new(out: W) -> TextSubchannelLog<W> {
        TextSubchannelLog { out, failed: false }
    }

    /// Return the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: std::fmt::Arguments) {
        if self.failed {
            return;
        }

        if let Err(e) = self.out.write_fmt(args).and_then(|_| self.out.write_all(b"\n")) {
            log::warn!("Subchannel log write failed, disabling it: {}", e);
            self.failed = true;
        }
    }

    fn fix(&mut self, lba: i64, what: &str) {
        self.line(format_args!("{}: fixed {}", position(lba), what));
    }
}

fn position(lba: i64) -> String {
    match Msf::from_lba(lba) {
        Some(msf) => format!("{:>7} ({})", lba, msf),
        None => format!("{:>7} (--:--:--)", lba),
    }
}

impl<W: Write> SubchannelLog for TextSubchannelLog<W> {
    fn write_entry(
        &mut self,
        data: &[u8],
        is_raw: bool,
        lba: i64,
        count: u32,
        generated: bool,
        fixed: bool,
    ) {
        let size = if is_raw { SUBCHANNEL_SIZE } else { Q16_SIZE };
        let tag = match (generated, fixed) {
            (true, _) => " GENERATED",
            (false, true) => " FIXED",
            _ => "",
        };

        for (n, block) in data.chunks_exact(size).take(count as usize).enumerate() {
            let lba = lba + n as i64;

            if is_raw {
                let planes = deinterleave(array_ref![block, 0, SUBCHANNEL_SIZE]);
                let p = PChannel::new(*array_ref![planes, 0, CHANNEL_SIZE]);
                let q = QBlock::from_planes(&planes);

                self.line(format_args!(
                    "{}: P {} {:?} RW {}{}",
                    position(lba),
                    if !p.valid() {
                        "noisy"
                    } else if p.raw()[0] == 0 {
                        "off"
                    } else {
                        "on"
                    },
                    q,
                    if rw_quiet(&planes) { "quiet" } else { "data" },
                    tag,
                ));
            } else {
                let q = QBlock::new(*array_ref![block, 0, CHANNEL_SIZE]);

                self.line(format_args!("{}: {:?}{}", position(lba), q, tag));
            }
        }
    }

    fn write_p_fix(&mut self, lba: i64) {
        self.fix(lba, "P subchannel")
    }

    fn write_rw_fix(&mut self, lba: i64) {
        self.fix(lba, "R-W subchannels")
    }

    fn write_q_adr_fix(&mut self, lba: i64) {
        self.fix(lba, "Q ADR")
    }

    fn write_q_ctrl_fix(&mut self, lba: i64) {
        self.fix(lba, "Q CONTROL")
    }

    fn write_q_zero_fix(&mut self, lba: i64) {
        self.fix(lba, "Q ZERO")
    }

    fn write_q_tno_fix(&mut self, lba: i64) {
        self.fix(lba, "Q TNO")
    }

    fn write_q_index_fix(&mut self, lba: i64) {
        self.fix(lba, "Q INDEX")
    }

    fn write_q_rel_pos_fix(&mut self, lba: i64) {
        self.fix(lba, "Q relative position")
    }

    fn write_q_abs_pos_fix(&mut self, lba: i64) {
        self.fix(lba, "Q absolute position")
    }

    fn write_q_crc_fix(&mut self, lba: i64) {
        self.fix(lba, "Q CRC")
    }

    fn write_q_mcn_fix(&mut self, lba: i64) {
        self.fix(lba, "Q MCN")
    }

    fn write_q_isrc_fix(&mut self, lba: i64) {
        self.fix(lba, "Q ISRC")
    }
}
