//! YM2164 (OPP) FM synthesis core
//!
//! 8 channels of 4 operators, LFO, noise generator and two interval timers.
//! The OPP is register compatible with the YM2151 (OPM); the operator math
//! follows the well-known YM2151 integer model. All state advances one
//! output sample at a time through [`Ym2164::advance_sample`].

use log::trace;

use super::operator::{
    phase_step, EnvelopeState, FrequencyTables, Operator, KEY_SOURCE_CSM, KEY_SOURCE_REGISTER,
};
use super::registers::{
    operator_index, REG_CH_KC, REG_CH_KF, REG_CH_PMS_AMS, REG_CH_RL_FB_CON, REG_KEY_ON,
    REG_LFO_FREQ, REG_LFO_PMD_AMD, REG_LFO_WAVE, REG_NOISE, REG_OP_DT1_MUL, REG_OP_DT2_D2R,
    REG_OP_KS_AR, REG_OP_D1L_RR, REG_OP_AME_D1R, REG_OP_TL, REG_TEST, REG_TIMER_A_HI,
    REG_TIMER_A_LO, REG_TIMER_B, REG_TIMER_CTRL,
};
use super::tables::{
    phaseinc_rom, tables, DT1_TAB, EG_SH, ENV_QUIET, FREQ_MASK, FREQ_SH, LFO_SH, SIN_LEN,
    SIN_MASK, TIMER_SH, TL_TAB_LEN,
};

/// Default OPP master clock on the card.
pub const DEFAULT_MASTER_CLOCK: u32 = 3_579_545;
/// Native output rate divider.
pub const CLOCK_DIVIDER: u32 = 64;
const DEFAULT_SAMPLE_RATE: u32 = DEFAULT_MASTER_CLOCK / CLOCK_DIVIDER;

/// Status register: timer A overflow flag.
pub const STATUS_TIMER_A: u8 = 0x01;
/// Status register: timer B overflow flag.
pub const STATUS_TIMER_B: u8 = 0x02;

/// Operator routing targets inside one channel evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    M2 = 0,
    C1 = 1,
    C2 = 2,
    Mem = 3,
    Out = 4,
}

#[derive(Debug, Clone)]
struct Channel {
    kc: u8,
    kf: u8,
    pms_ams: u8,
    pan_left: bool,
    pan_right: bool,
    fb_shift: u32,
    /// `None` marks algorithm 5 where M1 feeds C1, C2 and the delay.
    m1_connect: Option<Slot>,
    m2_connect: Slot,
    c1_connect: Slot,
    mem_connect: Slot,
    mem_value: i32,
    fb_out_prev: i32,
    fb_out_curr: i32,
}

impl Channel {
    fn new() -> Self {
        let mut ch = Self {
            kc: 0,
            kf: 0,
            pms_ams: 0,
            pan_left: false,
            pan_right: false,
            fb_shift: 0,
            m1_connect: None,
            m2_connect: Slot::C2,
            c1_connect: Slot::Mem,
            mem_connect: Slot::M2,
            mem_value: 0,
            fb_out_prev: 0,
            fb_out_curr: 0,
        };
        ch.set_connect(0);
        ch
    }

    fn set_connect(&mut self, algorithm: u8) {
        use Slot::*;
        let (m1, c1, m2, mem) = match algorithm & 7 {
            // M1-C1-MEM-M2-C2
            0 => (Some(C1), Mem, C2, M2),
            // (M1+C1)-MEM-M2-C2
            1 => (Some(Mem), Mem, C2, M2),
            // (M1 + C1-MEM-M2)-C2
            2 => (Some(C2), Mem, C2, M2),
            // (M1-C1-MEM + M2)-C2
            3 => (Some(C1), Mem, C2, C2),
            // M1-C1 + M2-C2
            4 => (Some(C1), Out, C2, Mem),
            // M1 into C1, C2 and MEM-M2
            5 => (None, Out, Out, M2),
            // M1-C1 + M2 + C2
            6 => (Some(C1), Out, Out, Mem),
            // all carriers
            _ => (Some(Out), Out, Out, Mem),
        };
        self.m1_connect = m1;
        self.c1_connect = c1;
        self.m2_connect = m2;
        self.mem_connect = mem;
    }

    fn pms(&self) -> u32 {
        ((self.pms_ams >> 4) & 7) as u32
    }

    fn ams(&self) -> u32 {
        (self.pms_ams & 3) as u32
    }
}

#[derive(Debug, Clone, Default)]
struct Timer {
    period: u32,
    running: bool,
    /// Remaining native samples in `TIMER_SH` fixed point.
    remaining: i64,
}

/// YM2164 OPP emulator
#[derive(Debug, Clone)]
pub struct Ym2164 {
    selected_reg: u8,
    regs: [u8; 256],
    operators: Vec<Operator>,
    channels: Vec<Channel>,
    tables: FrequencyTables,
    noise_tab: [u32; 32],

    eg_cnt: u32,
    eg_timer: u32,
    eg_timer_add: u32,
    eg_timer_overflow: u32,

    lfo_phase: u32,
    lfo_timer: u32,
    lfo_timer_add: u32,
    lfo_overflow: u32,
    lfo_counter: u32,
    lfo_counter_add: u32,
    lfo_wsel: u8,
    amd: u32,
    pmd: i32,
    lfa: u32,
    lfp: i32,
    test: u8,

    noise: u8,
    noise_rng: u32,
    noise_p: u32,
    noise_f: u32,

    timer_a: Timer,
    timer_b: Timer,
    timer_add: i64,
    irq_enable: u8,
    status: u8,

    master_clock: u32,
    sample_rate: u32,
}

impl Ym2164 {
    /// Create a chip clocked at the card's 3.58 MHz, rendering at its native rate.
    pub fn new() -> Self {
        Self::with_clocks(DEFAULT_MASTER_CLOCK, DEFAULT_SAMPLE_RATE)
    }

    /// Create a chip with explicit master clock and output sample rate.
    pub fn with_clocks(master_clock: u32, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        let native = master_clock as f64 / CLOCK_DIVIDER as f64;
        let scaler = native / sample_rate as f64;

        let mut freq = vec![0u32; 11 * 768];
        for i in 0..768 {
            let phaseinc = phaseinc_rom(i) as f64 * scaler;
            let reference = ((phaseinc * 64.0) as u32) & 0xFFFF_FFC0;
            freq[768 + 2 * 768 + i] = reference;
            for j in 0..2 {
                freq[768 + j * 768 + i] = (reference >> (2 - j)) & 0xFFFF_FFC0;
            }
            for j in 3..8 {
                freq[768 + j * 768 + i] = reference << (j - 2);
            }
        }
        let lowest = freq[768];
        freq[..768].fill(lowest);
        let highest = freq[768 + 8 * 768 - 1];
        freq[768 + 8 * 768..].fill(highest);

        let mut dt1_freq = [0i32; 256];
        for j in 0..4 {
            for i in 0..32 {
                let hz = DT1_TAB[j * 32 + i] as f64 * native / (1u32 << 20) as f64;
                let phaseinc = hz * SIN_LEN as f64 / sample_rate as f64;
                let v = (phaseinc * (1u32 << FREQ_SH) as f64) as i32;
                dt1_freq[j * 32 + i] = v;
                dt1_freq[(j + 4) * 32 + i] = -v;
            }
        }

        let mut noise_tab = [0u32; 32];
        for (i, slot) in noise_tab.iter_mut().enumerate() {
            let j = 32 - if i != 31 { i } else { 30 };
            *slot = (65536.0 / (j as f64 * 32.0) * 64.0 * scaler) as u32;
        }

        let mut chip = Self {
            selected_reg: 0,
            regs: [0; 256],
            operators: (0..32).map(|_| Operator::new()).collect(),
            channels: (0..8).map(|_| Channel::new()).collect(),
            tables: FrequencyTables { freq, dt1_freq },
            noise_tab,
            eg_cnt: 0,
            eg_timer: 0,
            eg_timer_add: ((1u32 << EG_SH) as f64 * scaler) as u32,
            eg_timer_overflow: 3 * (1 << EG_SH),
            lfo_phase: 0,
            lfo_timer: 0,
            lfo_timer_add: ((1u32 << LFO_SH) as f64 * scaler) as u32,
            lfo_overflow: 0,
            lfo_counter: 0,
            lfo_counter_add: 0,
            lfo_wsel: 0,
            amd: 0,
            pmd: 0,
            lfa: 0,
            lfp: 0,
            test: 0,
            noise: 0,
            noise_rng: 0,
            noise_p: 0,
            noise_f: 0,
            timer_a: Timer::default(),
            timer_b: Timer::default(),
            timer_add: ((1u64 << TIMER_SH) as f64 * scaler) as i64,
            irq_enable: 0,
            status: 0,
            master_clock,
            sample_rate,
        };
        chip.reset();
        chip
    }

    /// Reset all registers and generator state.
    pub fn reset(&mut self) {
        for op in self.operators.iter_mut() {
            *op = Operator::new();
        }
        for ch in self.channels.iter_mut() {
            *ch = Channel::new();
        }
        self.regs = [0; 256];
        self.eg_cnt = 0;
        self.eg_timer = 0;
        self.lfo_phase = 0;
        self.lfo_timer = 0;
        self.lfo_counter = 0;
        self.lfa = 0;
        self.lfp = 0;
        self.noise_rng = 0;
        self.noise_p = 0;
        self.timer_a = Timer::default();
        self.timer_b = Timer::default();
        self.status = 0;
        self.irq_enable = 0;
        self.selected_reg = 0;

        self.write_register(REG_LFO_FREQ, 0);
        self.write_register(REG_NOISE, 0);
        self.write_register(REG_TEST, 0);
        self.rebuild_derived();
    }

    /// Master clock this instance was created with.
    pub fn master_clock(&self) -> u32 {
        self.master_clock
    }

    /// Output sample rate this instance renders at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Port access: port 0 selects a register, port 1 writes it.
    pub fn write_port(&mut self, port: u8, value: u8) {
        if port & 1 == 0 {
            self.selected_reg = value;
        } else {
            self.write_register(self.selected_reg, value);
        }
    }

    /// Port read: the status register on either port.
    pub fn read_port(&self, _port: u8) -> u8 {
        self.status
    }

    /// Timer overflow flags (bit 0 timer A, bit 1 timer B).
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Level of the chip's interrupt output.
    pub fn irq(&self) -> bool {
        self.status & (STATUS_TIMER_A | STATUS_TIMER_B) != 0
    }

    /// Last value written to a register.
    pub fn read_register(&self, reg: u8) -> u8 {
        self.regs[reg as usize]
    }

    /// Envelope state of operator `op` (0-31, channel*4 + M1/M2/C1/C2).
    pub fn envelope_state(&self, op: usize) -> EnvelopeState {
        self.operators[op].state
    }

    /// Current attenuation of operator `op` including total level.
    pub fn attenuation(&self, op: usize) -> u32 {
        self.operators[op].attenuation(0)
    }

    /// Write a chip register and update every derived field it feeds.
    pub fn write_register(&mut self, reg: u8, value: u8) {
        trace!("ym2164 reg {reg:02X} <- {value:02X}");
        self.regs[reg as usize] = value;
        match reg & 0xE0 {
            0x00 => self.write_system(reg, value),
            0x20 => self.write_channel(reg, value),
            _ => self.write_operator(reg, value),
        }
    }

    fn write_system(&mut self, reg: u8, value: u8) {
        match reg {
            REG_TEST => {
                self.test = value;
                if value & 0x02 != 0 {
                    self.lfo_phase = 0;
                }
            }
            REG_KEY_ON => {
                let base = ((value & 7) as usize) * 4;
                let bits = [0x08, 0x20, 0x10, 0x40];
                let eg_cnt = self.eg_cnt;
                for (slot, bit) in bits.iter().enumerate() {
                    let op = &mut self.operators[base + slot];
                    if value & bit != 0 {
                        op.key_on(KEY_SOURCE_REGISTER, eg_cnt);
                    } else {
                        op.key_off(KEY_SOURCE_REGISTER);
                    }
                }
            }
            REG_NOISE => {
                self.noise = value;
                self.noise_f = self.noise_tab[(value & 0x1F) as usize];
            }
            REG_TIMER_A_LO => {
                self.timer_a.period = (self.timer_a.period & 0x003) | ((value as u32) << 2);
            }
            REG_TIMER_A_HI => {
                self.timer_a.period = (self.timer_a.period & 0x3FC) | (value as u32 & 3);
            }
            REG_TIMER_B => self.timer_b.period = value as u32,
            REG_TIMER_CTRL => self.write_timer_control(value),
            REG_LFO_FREQ => {
                self.lfo_overflow = (1 << ((15 - (value >> 4) as u32) + 3)) * (1 << LFO_SH);
                self.lfo_counter_add = 0x10 + (value & 0x0F) as u32;
            }
            REG_LFO_PMD_AMD => {
                if value & 0x80 != 0 {
                    self.pmd = (value & 0x7F) as i32;
                } else {
                    self.amd = (value & 0x7F) as u32;
                }
            }
            REG_LFO_WAVE => self.lfo_wsel = value & 3,
            _ => {}
        }
    }

    fn write_timer_control(&mut self, value: u8) {
        self.irq_enable = value;
        if value & 0x10 != 0 {
            self.status &= !STATUS_TIMER_A;
        }
        if value & 0x20 != 0 {
            self.status &= !STATUS_TIMER_B;
        }
        if value & 0x02 != 0 {
            if !self.timer_b.running {
                self.timer_b.running = true;
                self.timer_b.remaining = self.timer_b_length();
            }
        } else {
            self.timer_b.running = false;
        }
        if value & 0x01 != 0 {
            if !self.timer_a.running {
                self.timer_a.running = true;
                self.timer_a.remaining = self.timer_a_length();
            }
        } else {
            self.timer_a.running = false;
        }
    }

    fn timer_a_length(&self) -> i64 {
        (1024 - self.timer_a.period as i64) << TIMER_SH
    }

    fn timer_b_length(&self) -> i64 {
        (16 * (256 - self.timer_b.period as i64)) << TIMER_SH
    }

    fn write_channel(&mut self, reg: u8, value: u8) {
        let ch_idx = (reg & 7) as usize;
        let ch = &mut self.channels[ch_idx];
        match reg & 0x38 {
            REG_CH_RL_FB_CON => {
                ch.pan_left = value & 0x40 != 0;
                ch.pan_right = value & 0x80 != 0;
                let fb = ((value >> 3) & 7) as u32;
                ch.fb_shift = if fb != 0 { fb + 6 } else { 0 };
                ch.set_connect(value & 7);
            }
            REG_CH_KC => {
                ch.kc = value & 0x7F;
                self.refresh_channel(ch_idx);
            }
            REG_CH_KF => {
                ch.kf = value & 0xFC;
                self.refresh_channel(ch_idx);
            }
            REG_CH_PMS_AMS => ch.pms_ams = value,
            _ => {}
        }
    }

    fn write_operator(&mut self, reg: u8, value: u8) {
        let idx = operator_index(reg);
        let op = &mut self.operators[idx];
        match reg & 0xE0 {
            REG_OP_DT1_MUL => op.dt1_mul = value,
            REG_OP_TL => op.tl_reg = value,
            REG_OP_KS_AR => op.ks_ar = value,
            REG_OP_AME_D1R => op.ame_d1r = value,
            REG_OP_DT2_D2R => op.dt2_d2r = value,
            REG_OP_D1L_RR => op.d1l_rr = value,
            _ => return,
        }
        self.refresh_operator(idx);
    }

    fn refresh_channel(&mut self, ch: usize) {
        for slot in 0..4 {
            self.refresh_operator(ch * 4 + slot);
        }
    }

    fn refresh_operator(&mut self, idx: usize) {
        let ch = &self.channels[idx / 4];
        let (kc, kf) = (ch.kc, ch.kf);
        self.operators[idx].refresh(kc, kf, &self.tables);
    }

    /// Recompute every operator's derived fields from the register image.
    pub fn rebuild_derived(&mut self) {
        for idx in 0..self.operators.len() {
            self.refresh_operator(idx);
        }
    }

    #[cfg(test)]
    pub(crate) fn derived_snapshot(&self) -> Vec<super::operator::DerivedRates> {
        self.operators.iter().map(|op| op.rates).collect()
    }

    /// Render one stereo output sample.
    pub fn advance_sample(&mut self) -> (i16, i16) {
        self.advance_envelope();

        let mut left: i32 = 0;
        let mut right: i32 = 0;
        for ch in 0..8 {
            let out = self.channel_output(ch);
            let c = &self.channels[ch];
            if c.pan_left {
                left += out;
            }
            if c.pan_right {
                right += out;
            }
        }

        self.advance_lfo_phase_noise();
        self.advance_timers();

        (
            left.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            right.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        )
    }

    fn advance_envelope(&mut self) {
        self.eg_timer += self.eg_timer_add;
        while self.eg_timer >= self.eg_timer_overflow {
            self.eg_timer -= self.eg_timer_overflow;
            self.eg_cnt = self.eg_cnt.wrapping_add(1);
            let eg_cnt = self.eg_cnt;
            for op in self.operators.iter_mut() {
                op.advance_envelope(eg_cnt);
            }
        }
    }

    fn channel_output(&mut self, ch_idx: usize) -> i32 {
        let t = tables();
        let lfa = self.lfa;
        let noise_on = ch_idx == 7 && self.noise & 0x80 != 0;
        let noise_bit = self.noise_rng & 0x10000 != 0;
        let ch = &mut self.channels[ch_idx];
        let ops = &self.operators[ch_idx * 4..ch_idx * 4 + 4];

        let am = match ch.ams() {
            0 => 0,
            n => lfa << (n - 1),
        };

        let mut bus = [0i32; 5];
        bus[ch.mem_connect as usize] = ch.mem_value;

        // M1 with self feedback
        let env = ops[0].attenuation(am);
        let fb_in = ch.fb_out_prev + ch.fb_out_curr;
        ch.fb_out_prev = ch.fb_out_curr;
        match ch.m1_connect {
            None => {
                bus[Slot::Mem as usize] = ch.fb_out_prev;
                bus[Slot::C1 as usize] = ch.fb_out_prev;
                bus[Slot::C2 as usize] = ch.fb_out_prev;
            }
            Some(slot) => bus[slot as usize] = ch.fb_out_prev,
        }
        ch.fb_out_curr = 0;
        if env < ENV_QUIET {
            let fb = if ch.fb_shift == 0 { 0 } else { fb_in << ch.fb_shift };
            ch.fb_out_curr = op_calc1(t, &ops[0], env, fb);
        }

        // M2
        let env = ops[1].attenuation(am);
        if env < ENV_QUIET {
            bus[ch.m2_connect as usize] += op_calc(t, &ops[1], env, bus[Slot::M2 as usize]);
        }
        // C1
        let env = ops[2].attenuation(am);
        if env < ENV_QUIET {
            bus[ch.c1_connect as usize] += op_calc(t, &ops[2], env, bus[Slot::C1 as usize]);
        }
        // C2, replaced by noise on channel 7
        let env = ops[3].attenuation(am);
        if noise_on {
            if env < 0x3FF {
                let out = ((env ^ 0x3FF) * 2) as i32;
                bus[Slot::Out as usize] += if noise_bit { out } else { -out };
            }
        } else if env < ENV_QUIET {
            bus[Slot::Out as usize] += op_calc(t, &ops[3], env, bus[Slot::C2 as usize]);
        }

        ch.mem_value = bus[Slot::Mem as usize];
        bus[Slot::Out as usize]
    }

    fn advance_lfo_phase_noise(&mut self) {
        let t = tables();
        if self.test & 0x02 != 0 {
            self.lfo_phase = 0;
        } else {
            self.lfo_timer += self.lfo_timer_add;
            if self.lfo_timer >= self.lfo_overflow {
                self.lfo_timer -= self.lfo_overflow;
                self.lfo_counter += self.lfo_counter_add;
                self.lfo_phase = (self.lfo_phase + (self.lfo_counter >> 4)) & 0xFF;
                self.lfo_counter &= 15;
            }
        }

        let i = self.lfo_phase as i32;
        let (a, p) = match self.lfo_wsel {
            0 => (255 - i, if i < 128 { i } else { i - 255 }),
            1 => {
                if i < 128 {
                    (255, 128)
                } else {
                    (0, -128)
                }
            }
            2 => {
                let a = if i < 128 { 255 - i * 2 } else { i * 2 - 256 };
                let p = if i < 64 {
                    i * 2
                } else if i < 128 {
                    255 - i * 2
                } else if i < 192 {
                    256 - i * 2
                } else {
                    i * 2 - 511
                };
                (a, p)
            }
            _ => {
                let a = t.lfo_noise[i as usize] as i32;
                (a, a - 128)
            }
        };
        self.lfa = (a as u32 * self.amd) / 128;
        self.lfp = (p * self.pmd) / 128;

        for ch_idx in 0..8 {
            let pms = self.channels[ch_idx].pms();
            let mod_ind = if pms == 0 {
                0
            } else if pms < 6 {
                self.lfp >> (6 - pms)
            } else {
                self.lfp << (pms - 5)
            };
            for op in self.operators[ch_idx * 4..ch_idx * 4 + 4].iter_mut() {
                let step = if mod_ind != 0 {
                    let kc_i = (op.rates.kc_i as i32 + mod_ind).max(0) as u32;
                    phase_step(&self.tables, kc_i, op.rates.dt2, op.rates.dt1, op.rates.mul)
                } else {
                    op.rates.freq
                };
                op.phase = op.phase.wrapping_add(step);
            }
        }

        self.noise_p += self.noise_f;
        let mut steps = self.noise_p >> 16;
        self.noise_p &= 0xFFFF;
        while steps > 0 {
            let j = ((self.noise_rng ^ (self.noise_rng >> 3)) & 1) ^ 1;
            self.noise_rng = (j << 16) | (self.noise_rng >> 1);
            steps -= 1;
        }
    }

    fn advance_timers(&mut self) {
        if self.timer_a.running {
            self.timer_a.remaining -= self.timer_add;
            while self.timer_a.remaining <= 0 {
                self.timer_a.remaining += self.timer_a_length();
                self.timer_a_overflow();
            }
        }
        if self.timer_b.running {
            self.timer_b.remaining -= self.timer_add;
            while self.timer_b.remaining <= 0 {
                self.timer_b.remaining += self.timer_b_length();
                if self.irq_enable & 0x08 != 0 {
                    self.status |= STATUS_TIMER_B;
                }
            }
        }
    }

    fn timer_a_overflow(&mut self) {
        if self.irq_enable & 0x04 != 0 {
            self.status |= STATUS_TIMER_A;
        }
        if self.irq_enable & 0x80 != 0 {
            let eg_cnt = self.eg_cnt;
            for op in self.operators.iter_mut() {
                op.key_on(KEY_SOURCE_CSM, eg_cnt);
                op.key_off(KEY_SOURCE_CSM);
            }
        }
    }
}

impl Default for Ym2164 {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn op_calc(t: &super::tables::Tables, op: &Operator, env: u32, pm: i32) -> i32 {
    let phase = ((op.phase & !FREQ_MASK) as i32).wrapping_add(pm << 15);
    let p = (env << 3) + t.sin_tab[((phase >> FREQ_SH) & SIN_MASK) as usize];
    if p as usize >= TL_TAB_LEN {
        0
    } else {
        t.tl_tab[p as usize]
    }
}

#[inline]
fn op_calc1(t: &super::tables::Tables, op: &Operator, env: u32, pm: i32) -> i32 {
    let phase = ((op.phase & !FREQ_MASK) as i32).wrapping_add(pm);
    let p = (env << 3) + t.sin_tab[((phase >> FREQ_SH) & SIN_MASK) as usize];
    if p as usize >= TL_TAB_LEN {
        0
    } else {
        t.tl_tab[p as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_patch(chip: &mut Ym2164, ch: u8) {
        chip.write_register(REG_CH_RL_FB_CON | ch, 0xC7); // both speakers, algorithm 7
        chip.write_register(REG_CH_KC | ch, 0x4A); // A4
        for slot in 0..4u8 {
            let r = ch + slot * 8;
            chip.write_register(REG_OP_DT1_MUL | r, 0x01);
            chip.write_register(REG_OP_TL | r, if slot == 3 { 0x00 } else { 0x7F });
            chip.write_register(REG_OP_KS_AR | r, 0x1F);
            chip.write_register(REG_OP_AME_D1R | r, 0x00);
            chip.write_register(REG_OP_DT2_D2R | r, 0x00);
            chip.write_register(REG_OP_D1L_RR | r, 0x0F);
        }
    }

    fn peak(chip: &mut Ym2164, samples: usize) -> i32 {
        (0..samples)
            .map(|_| {
                let (l, r) = chip.advance_sample();
                (l as i32).abs().max((r as i32).abs())
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn key_on_produces_sound() {
        let mut chip = Ym2164::new();
        sine_patch(&mut chip, 0);
        chip.write_register(REG_KEY_ON, 0x78);
        assert!(peak(&mut chip, 500) > 1000);
    }

    #[test]
    fn max_total_level_is_silent() {
        let mut chip = Ym2164::new();
        sine_patch(&mut chip, 0);
        for op in 0..32u8 {
            let reg = REG_OP_TL | (op & 7) | ((op >> 3) << 3);
            chip.write_register(reg, 0x7F);
        }
        chip.write_register(REG_KEY_ON, 0x78);
        assert_eq!(peak(&mut chip, 3), 0);
        assert_eq!(peak(&mut chip, 200), 0);
    }

    #[test]
    fn pan_mask_routes_channels() {
        let mut chip = Ym2164::new();
        sine_patch(&mut chip, 2);
        chip.write_register(REG_CH_RL_FB_CON | 2, 0x47); // left only
        chip.write_register(REG_KEY_ON, 0x78 | 2);
        let mut right = 0;
        let mut left = 0;
        for _ in 0..500 {
            let (l, r) = chip.advance_sample();
            left = left.max((l as i32).abs());
            right = right.max((r as i32).abs());
        }
        assert!(left > 0);
        assert_eq!(right, 0);
    }

    #[test]
    fn key_off_releases_all_slots() {
        let mut chip = Ym2164::new();
        sine_patch(&mut chip, 1);
        chip.write_register(REG_KEY_ON, 0x79);
        chip.advance_sample();
        chip.write_register(REG_KEY_ON, 0x01);
        for op in 4..8 {
            assert!(chip.envelope_state(op) <= EnvelopeState::Release);
        }
    }

    #[test]
    fn derived_fields_match_full_rebuild() {
        let mut chip = Ym2164::new();
        let mut seed = 0x1234_5678u32;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let reg = 0x28 + ((seed >> 8) % 0xD8) as u8;
            let value = (seed >> 20) as u8;
            chip.write_register(reg, value);
            let incremental = chip.derived_snapshot();
            chip.rebuild_derived();
            assert_eq!(incremental, chip.derived_snapshot(), "after reg {reg:02X}");
        }
    }

    #[test]
    fn timer_a_sets_status_and_clears_on_reset_flag() {
        let mut chip = Ym2164::new();
        chip.write_register(REG_TIMER_A_LO, 0xFF);
        chip.write_register(REG_TIMER_A_HI, 0x03); // period 1023: one native sample
        chip.write_register(REG_TIMER_CTRL, 0x05);
        chip.advance_sample();
        chip.advance_sample();
        assert!(chip.irq());
        assert_eq!(chip.status() & STATUS_TIMER_A, STATUS_TIMER_A);
        chip.write_register(REG_TIMER_CTRL, 0x15);
        assert!(!chip.irq());
    }

    #[test]
    fn timer_b_counts_sixteen_native_samples_per_step() {
        let mut chip = Ym2164::new();
        chip.write_register(REG_TIMER_B, 0xFF);
        chip.write_register(REG_TIMER_CTRL, 0x0A);
        for _ in 0..15 {
            chip.advance_sample();
        }
        assert!(!chip.irq());
        chip.advance_sample();
        assert!(chip.irq());
    }

    #[test]
    fn status_port_reads_flags() {
        let mut chip = Ym2164::new();
        chip.write_port(0, REG_TIMER_B);
        chip.write_port(1, 0xFF);
        chip.write_port(0, REG_TIMER_CTRL);
        chip.write_port(1, 0x0A);
        for _ in 0..16 {
            chip.advance_sample();
        }
        assert_eq!(chip.read_port(0), STATUS_TIMER_B);
    }
}
