//! Fixture PAR/REC pairs for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const NX: usize = 4;
pub const NY: usize = 4;
pub const PIXELS: usize = NX * NY;

pub const SAMPLE_OFFCENTRE: [f64; 3] = [-18.79, -33.29, -16.06];

/// One slice row of a V4.2 header with 4x4 16-bit pixels.
#[derive(Debug, Clone)]
pub struct Row {
    pub slice: u32,
    pub dynamic: u32,
    pub index: u32,
    pub intercept: f64,
    pub slope: f64,
    pub scale_slope: f64,
    pub offcentre: [f64; 3],
    pub b_factor: f64,
    pub gradient: u32,
    pub diffusion: [f64; 3],
}

impl Row {
    pub fn new(slice: u32, dynamic: u32, index: u32) -> Self {
        Self {
            slice,
            dynamic,
            index,
            intercept: 0.0,
            slope: 11.66129,
            scale_slope: 5.47580e-3,
            offcentre: SAMPLE_OFFCENTRE,
            b_factor: 0.0,
            gradient: 1,
            diffusion: [0.0; 3],
        }
    }

    pub fn render(&self) -> String {
        let [ap, fh, rl] = self.offcentre;
        let [dap, dfh, drl] = self.diffusion;
        format!(
            "{} 1 {} 1 0 2 {} 16 62 {NX} {NY} {:.5} {:.5} {:.5e} 1070 1860 -1.98 0.55 0.02 \
             {ap:.3} {fh:.3} {rl:.3} 10.000 2.330 0 1 0 2 1.912 1.912 30.00 0.00 0.00 {:.2} 1 \
             90.00 0 0 0 39 0.0 1 {} 0 0 {dap:.3} {dfh:.3} {drl:.3} 1",
            self.slice,
            self.dynamic,
            self.index,
            self.intercept,
            self.slope,
            self.scale_slope,
            self.b_factor,
            self.gradient,
        )
    }
}

/// `slices` x `dynamics` rows, volume-major, REC blocks in row order.
pub fn rows(slices: u32, dynamics: u32) -> Vec<Row> {
    (1..=dynamics)
        .flat_map(|dynamic| (1..=slices).map(move |slice| (slice, dynamic)))
        .enumerate()
        .map(|(index, (slice, dynamic))| Row::new(slice, dynamic, index as u32))
        .collect()
}

pub fn par_text(rows: &[Row], max_slices: u32) -> String {
    let mut text = format!(
        "# === DATA DESCRIPTION FILE ======================================================\n\
         #\n\
         # CAUTION - Investigational device.\n\
         #\n\
         # Dataset name: E:\\export\\phantom\n\
         #\n\
         # CLINICAL TRYOUT             Research image export tool     V4.2\n\
         #\n\
         # === GENERAL INFORMATION ========================================================\n\
         #\n\
         .    Patient name                       :   phantom\n\
         .    Examination name                   :   fmri\n\
         .    Protocol name                      :   EPI\n\
         .    Examination date/time              :   2014.02.14 / 09:00:04\n\
         .    Series Type                        :   Image   MRSERIES\n\
         .    Acquisition nr                     :   3\n\
         .    Reconstruction nr                  :   1\n\
         .    Scan Duration [sec]                :   34.8\n\
         .    Max. number of cardiac phases      :   1\n\
         .    Max. number of echoes              :   1\n\
         .    Max. number of slices/locations    :   {max_slices}\n\
         .    Max. number of dynamics            :   3\n\
         .    Max. number of mixes               :   1\n\
         .    Patient position                   :   Head First Supine\n\
         .    Preparation direction              :   Right-Left\n\
         .    Technique                          :   FEEPI\n\
         .    Scan resolution  (x, y)            :   64  63\n\
         .    Scan mode                          :   MS\n\
         .    Repetition time [ms]               :   2000.00\n\
         .    FOV (ap,fh,rl) [mm]                :   240.000  107.330  240.000\n\
         .    Water Fat shift [pixels]           :   6.000\n\
         .    Angulation midslice(ap,fh,rl)[degr]:   -1.980  0.550  0.020\n\
         .    Off Centre midslice(ap,fh,rl) [mm] :   -18.794  -33.292  -16.063\n\
         .    Flow compensation <0=no 1=yes> ?   :   0\n\
         .    EPI factor        <0,1=no EPI>     :   39\n\
         .    Dynamic scan      <0=no 1=yes> ?   :   1\n\
         .    Diffusion         <0=no 1=yes> ?   :   0\n\
         .    Max. number of diffusion values    :   1\n\
         .    Max. number of gradient orients    :   1\n\
         .    Number of label types   <0=no ASL> :   0\n\
         #\n\
         # === PIXEL VALUES =============================================================\n\
         #  PV = pixel value in REC file, FP = floating point value, DV = displayed value on console\n\
         #  RS = rescale slope,           RI = rescale intercept,    SS = scale slope\n\
         #  DV = PV * RS + RI             FP = DV / (RS * SS)\n\
         #\n\
         # === IMAGE INFORMATION ==========================================================\n\
         #  sl ec  dyn ph ty    idx pix scan% rec size                (re)scale              window\n\
         \n"
    );
    for row in rows {
        text.push_str("  ");
        text.push_str(&row.render());
        text.push('\n');
    }
    text.push_str(
        "\n# === END OF DATA DESCRIPTION FILE ===============================================\n",
    );
    text
}

/// Default pixel value of REC block `block`.
pub fn pixel_value(block: usize, pixel: usize) -> u16 {
    (block * 100 + pixel) as u16
}

pub fn rec_bytes(blocks: usize, value: impl Fn(usize, usize) -> u16) -> Vec<u8> {
    (0..blocks)
        .flat_map(|block| (0..PIXELS).map(move |pixel| (block, pixel)))
        .flat_map(|(block, pixel)| value(block, pixel).to_le_bytes())
        .collect()
}

/// Write `<stem>.<par_ext>` and `<stem>.<rec_ext>` into `dir`, returning the
/// header path.
pub fn write_pair(
    dir: &Path,
    stem: &str,
    extensions: (&str, &str),
    par: &str,
    rec: &[u8],
) -> PathBuf {
    let header = dir.join(format!("{stem}.{}", extensions.0));
    std::fs::write(&header, par).unwrap();
    std::fs::write(dir.join(format!("{stem}.{}", extensions.1)), rec).unwrap();
    header
}
