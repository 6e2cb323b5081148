//! Detectores estadísticos de posible esteganografía en imágenes.
//!
//! Seis análisis independientes sobre el raster decodificado. Los veredictos
//! son señales heurísticas para revisión humana, no detección calibrada; los
//! umbrales viven en [`StegoThresholds`] y pueden ajustarse. Los cuatro
//! detectores costosos se omiten por encima de `large_image_pixels`.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Umbrales heurísticos de los detectores.
///
/// Los valores por defecto no están calibrados contra un corpus: quien
/// dependa de la precisión de detección debe tratarlos como parámetros
/// ajustables, no como verdad establecida.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct StegoThresholds {
    /// Banda abierta de fracción de bits LSB activos considerada sospechosa.
    pub lsb_band: (f64, f64),
    /// Estadístico chi-cuadrado por debajo del cual los pares de bins se
    /// consideran anómalamente igualados.
    pub chi_square_limit: f64,
    /// Percentil de magnitud que define un coeficiente DCT atípico.
    pub dct_percentile: f64,
    /// Cantidad de coeficientes atípicos tolerada antes de marcar sospecha.
    pub dct_coeff_limit: usize,
    /// Banda abierta de la proporción β de pares de paridad par.
    pub pair_band: (f64, f64),
    /// Cota del estadístico de discriminación |d| del análisis RS.
    pub rs_delta_limit: f64,
    /// Lado de la rejilla de muestreo de bloques 2×2 del análisis RS.
    pub rs_grid: u32,
    /// Cantidad de picos de histograma tolerada por el análisis PVD.
    pub pvd_peak_limit: usize,
    /// Lado del recorte centrado que acota el trabajo del análisis PVD.
    pub pvd_sample: u32,
    /// Píxeles a partir de los cuales se omiten los detectores costosos.
    pub large_image_pixels: u64,
}

impl Default for StegoThresholds {
    fn default() -> Self {
        Self {
            lsb_band: (0.45, 0.55),
            chi_square_limit: 0.1,
            dct_percentile: 99.95,
            dct_coeff_limit: 100,
            pair_band: (0.45, 0.55),
            rs_delta_limit: 0.05,
            rs_grid: 50,
            pvd_peak_limit: 5,
            pvd_sample: 1000,
            large_image_pixels: 1_000_000,
        }
    }
}

/// Veredicto individual de un detector.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Suspicious,
    NotSuspicious,
    /// El detector se omitió por el tamaño de la imagen; no es un error.
    SkippedLargeImage,
    /// No hubo bloques clasificables para decidir (solo análisis RS).
    InsufficientData,
    Error(String),
}

impl Verdict {
    fn flagged(flag: bool) -> Self {
        if flag {
            Self::Suspicious
        } else {
            Self::NotSuspicious
        }
    }
}

impl fmt::Display for Verdict {
    /// Formas textuales pactadas con el escáner de alertas; no reformular.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspicious => f.write_str("suspicious"),
            Self::NotSuspicious => f.write_str("not suspicious"),
            Self::SkippedLargeImage => f.write_str("skipped for large image"),
            Self::InsufficientData => f.write_str("insufficient data"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Un veredicto por detector. Los nombres serializados son contrato estable
/// con el escáner de alertas de seguridad; no renombrar.
#[derive(Clone, Debug, Serialize)]
pub struct StegoReport {
    #[serde(rename = "LSB_Analysis")]
    pub lsb: Verdict,
    #[serde(rename = "Chi_Square_Analysis")]
    pub chi_square: Verdict,
    #[serde(rename = "DCT_Analysis")]
    pub dct: Verdict,
    #[serde(rename = "Sample_Pair_Analysis")]
    pub sample_pair: Verdict,
    #[serde(rename = "RS_Analysis")]
    pub rs: Verdict,
    #[serde(rename = "PVD_Analysis")]
    pub pvd: Verdict,
}

impl StegoReport {
    /// Pares (clave estable, veredicto) en el orden de los detectores.
    pub fn entries(&self) -> [(&'static str, &Verdict); 6] {
        [
            ("LSB_Analysis", &self.lsb),
            ("Chi_Square_Analysis", &self.chi_square),
            ("DCT_Analysis", &self.dct),
            ("Sample_Pair_Analysis", &self.sample_pair),
            ("RS_Analysis", &self.rs),
            ("PVD_Analysis", &self.pvd),
        ]
    }

    /// Indica si la puerta de tamaño dejó detectores sin ejecutar.
    pub fn size_gated(&self) -> bool {
        self.dct == Verdict::SkippedLargeImage
    }
}

/// Ejecuta los seis detectores sobre un raster ya decodificado.
///
/// El plano de grises se deriva una sola vez. Cada detector se calcula de
/// manera aislada: su fallo interno produce un veredicto `error: …` sin
/// afectar al resto.
pub fn analyze(image: &DynamicImage, thresholds: &StegoThresholds) -> StegoReport {
    let gray = image.to_luma8();
    let pixels = u64::from(gray.width()) * u64::from(gray.height());
    let gated = pixels >= thresholds.large_image_pixels;

    let lsb = lsb_analysis(image, thresholds);
    let chi_square = chi_square_analysis(&gray, thresholds);

    let (dct, sample_pair, rs, pvd) = if gated {
        (
            Verdict::SkippedLargeImage,
            Verdict::SkippedLargeImage,
            Verdict::SkippedLargeImage,
            Verdict::SkippedLargeImage,
        )
    } else {
        (
            dct_analysis(&gray, thresholds),
            sample_pair_analysis(&gray, thresholds),
            rs_analysis(&gray, thresholds),
            pvd_analysis(&gray, thresholds),
        )
    };

    StegoReport {
        lsb,
        chi_square,
        dct,
        sample_pair,
        rs,
        pvd,
    }
}

// === LSB ===

/// Fracción de bits menos significativos activos en el primer canal. Las
/// imágenes naturales tienen planos LSB sesgados; el incrustado ingenuo los
/// empuja hacia 0.5.
fn lsb_analysis(image: &DynamicImage, thresholds: &StegoThresholds) -> Verdict {
    let rgb = image.to_rgb8();
    let total = u64::from(rgb.width()) * u64::from(rgb.height());
    if total == 0 {
        return Verdict::Error("empty raster".to_string());
    }
    let set_bits: u64 = rgb.pixels().map(|pixel| u64::from(pixel.0[0] & 1)).sum();
    let fraction = set_bits as f64 / total as f64;
    let (low, high) = thresholds.lsb_band;
    Verdict::flagged(fraction > low && fraction < high)
}

// === Chi cuadrado ===

/// Compara cada bin par del histograma con su bin impar vecino. El
/// incrustado LSB tiende a igualar pares que naturalmente difieren.
fn chi_square_analysis(gray: &GrayImage, thresholds: &StegoThresholds) -> Verdict {
    if gray.width() == 0 || gray.height() == 0 {
        return Verdict::Error("empty raster".to_string());
    }
    let histogram = luma_histogram(gray);
    let mut chi_square = 0.0;
    for pair in histogram.chunks_exact(2) {
        let even = pair[0] as f64;
        let odd = pair[1] as f64;
        chi_square += (even - odd).powi(2) / (even + odd + 1e-6);
    }
    Verdict::flagged(chi_square < thresholds.chi_square_limit)
}

fn luma_histogram(gray: &GrayImage) -> [u64; 256] {
    let mut histogram = [0_u64; 256];
    for value in gray.as_raw() {
        histogram[*value as usize] += 1;
    }
    histogram
}

// === DCT ===

/// Transforma el plano de grises al dominio de frecuencia y cuenta
/// coeficientes por encima del percentil configurado.
fn dct_analysis(gray: &GrayImage, thresholds: &StegoThresholds) -> Verdict {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width == 0 || height == 0 {
        return Verdict::Error("empty raster".to_string());
    }

    let mut plane: Vec<f64> = gray.as_raw().iter().map(|value| *value as f64).collect();
    dct_2d(&mut plane, width, height);

    let mut magnitudes: Vec<f64> = plane.iter().map(|value| value.abs()).collect();
    let threshold = percentile(&mut magnitudes, thresholds.dct_percentile);
    let outliers = plane
        .iter()
        .filter(|value| value.abs() > threshold)
        .count();
    Verdict::flagged(outliers > thresholds.dct_coeff_limit)
}

/// DCT-II ortonormal separable: primero filas, luego columnas.
fn dct_2d(plane: &mut [f64], width: usize, height: usize) {
    let mut scratch = vec![0.0; width.max(height)];
    for row in 0..height {
        let start = row * width;
        dct_1d(&plane[start..start + width], &mut scratch[..width]);
        plane[start..start + width].copy_from_slice(&scratch[..width]);
    }
    let mut column = vec![0.0; height];
    for col in 0..width {
        for row in 0..height {
            column[row] = plane[row * width + col];
        }
        dct_1d(&column, &mut scratch[..height]);
        for row in 0..height {
            plane[row * width + col] = scratch[row];
        }
    }
}

fn dct_1d(input: &[f64], output: &mut [f64]) {
    let n = input.len();
    let scale_dc = (1.0 / n as f64).sqrt();
    let scale_ac = (2.0 / n as f64).sqrt();
    let step = std::f64::consts::PI / (2 * n) as f64;
    for (k, slot) in output.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (i, sample) in input.iter().enumerate() {
            acc += sample * ((2 * i + 1) as f64 * k as f64 * step).cos();
        }
        *slot = if k == 0 { scale_dc } else { scale_ac } * acc;
    }
}

/// Percentil con interpolación lineal sobre la muestra ordenada.
fn percentile(values: &mut [f64], pct: f64) -> f64 {
    values.sort_by(f64::total_cmp);
    let last = values.len() - 1;
    let rank = (pct / 100.0).clamp(0.0, 1.0) * last as f64;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    if below == above {
        values[below]
    } else {
        let weight = rank - below as f64;
        values[below] * (1.0 - weight) + values[above] * weight
    }
}

// === Pares de muestras ===

/// Empareja cada píxel con su vecino derecho y clasifica por la paridad de
/// la suma de bits LSB. β cercano a 0.5 delata aleatorización del plano.
fn sample_pair_analysis(gray: &GrayImage, thresholds: &StegoThresholds) -> Verdict {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width < 2 || height == 0 {
        return Verdict::Error("raster too narrow for pairing".to_string());
    }

    let data = gray.as_raw();
    let mut even_pairs = 0_u64;
    let mut odd_pairs = 0_u64;
    for row in 0..height {
        let start = row * width;
        for pair in data[start..start + width].windows(2) {
            match (pair[0] & 1) + (pair[1] & 1) {
                0 => even_pairs += 1,
                1 => odd_pairs += 1,
                _ => {}
            }
        }
    }

    let total = even_pairs + odd_pairs;
    if total == 0 {
        return Verdict::Error("no classifiable pairs".to_string());
    }
    let beta = even_pairs as f64 / total as f64;
    let (low, high) = thresholds.pair_band;
    Verdict::flagged(beta > low && beta < high)
}

// === RS ===

/// Análisis Regular-Singular sobre una rejilla acotada de bloques 2×2:
/// compara la variación de cada bloque antes y después de voltear los LSB,
/// en ambos sentidos de desplazamiento.
fn rs_analysis(gray: &GrayImage, thresholds: &StegoThresholds) -> Verdict {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width < 2 || height < 2 {
        return Verdict::Error("raster too small for 2x2 blocks".to_string());
    }

    let grid = thresholds.rs_grid.max(1) as usize;
    let step_y = (height / grid).max(2);
    let step_x = (width / grid).max(2);
    let data = gray.as_raw();

    let mut regular = 0_u64;
    let mut singular = 0_u64;
    let mut regular_rev = 0_u64;
    let mut singular_rev = 0_u64;

    let mut y = 0;
    while y + 2 <= height {
        let mut x = 0;
        while x + 2 <= width {
            let block = [
                i32::from(data[y * width + x]),
                i32::from(data[y * width + x + 1]),
                i32::from(data[(y + 1) * width + x]),
                i32::from(data[(y + 1) * width + x + 1]),
            ];
            let flipped = block.map(|value| value ^ 1);

            let plain = shifted_difference(&block, 1);
            let altered = shifted_difference(&flipped, 1);
            if plain < altered {
                regular += 1;
            } else if plain > altered {
                singular += 1;
            }

            let plain_rev = shifted_difference(&block, -1);
            let altered_rev = shifted_difference(&flipped, -1);
            if plain_rev < altered_rev {
                regular_rev += 1;
            } else if plain_rev > altered_rev {
                singular_rev += 1;
            }

            x += step_x;
        }
        y += step_y;
    }

    let total = regular + singular;
    let total_rev = regular_rev + singular_rev;
    if total == 0 || total_rev == 0 {
        return Verdict::InsufficientData;
    }

    let forward = (regular as f64 - singular as f64).abs() / total as f64;
    let reverse = (regular_rev as f64 - singular_rev as f64).abs() / total_rev as f64;
    let discrimination = forward - reverse;
    Verdict::flagged(discrimination.abs() < thresholds.rs_delta_limit)
}

/// Suma de diferencias absolutas entre el bloque 2×2 y su rotación circular
/// de columnas en el sentido indicado.
fn shifted_difference(block: &[i32; 4], offset: i32) -> i32 {
    let rolled = match offset {
        1 | -1 => [block[1], block[0], block[3], block[2]],
        _ => *block,
    };
    block
        .iter()
        .zip(rolled)
        .map(|(original, moved)| (original - moved).abs())
        .sum()
}

// === PVD ===

/// Histograma normalizado de diferencias horizontales de intensidad; los
/// picos muy por encima de la media delatan cuantización del incrustado.
fn pvd_analysis(gray: &GrayImage, thresholds: &StegoThresholds) -> Verdict {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width < 2 || height == 0 {
        return Verdict::Error("raster too narrow for differencing".to_string());
    }

    // Recorte centrado para acotar el trabajo en rasters grandes.
    let (x0, y0, crop_w, crop_h) =
        if (width * height) as u64 > thresholds.large_image_pixels {
            let side = thresholds.pvd_sample as usize;
            let crop_w = side.min(width);
            let crop_h = side.min(height);
            ((width - crop_w) / 2, (height - crop_h) / 2, crop_w, crop_h)
        } else {
            (0, 0, width, height)
        };

    let data = gray.as_raw();
    let mut histogram = [0_u64; 256];
    let mut total = 0_u64;
    for row in y0..y0 + crop_h {
        let start = row * width + x0;
        for pair in data[start..start + crop_w].windows(2) {
            let difference = (i16::from(pair[1]) - i16::from(pair[0])).unsigned_abs();
            histogram[difference as usize] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return Verdict::Error("no horizontal differences".to_string());
    }

    let normalized: Vec<f64> = histogram
        .iter()
        .map(|count| *count as f64 / total as f64)
        .collect();
    let mean = normalized.iter().sum::<f64>() / normalized.len() as f64;
    let variance = normalized
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / normalized.len() as f64;
    let deviation = variance.sqrt();

    let peaks = normalized
        .iter()
        .filter(|value| **value > mean + 2.0 * deviation)
        .count();
    Verdict::flagged(peaks > thresholds.pvd_peak_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray_image(width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| Luma([pixel(x, y)])))
    }

    /// Generador xorshift determinista para ruido reproducible en pruebas.
    struct Xorshift(u32);

    impl Xorshift {
        fn next(&mut self) -> u32 {
            let mut state = self.0;
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            self.0 = state;
            state
        }
    }

    #[test]
    fn balanced_lsb_noise_is_flagged() {
        let mut rng = Xorshift(0x2545_F491);
        let noise = GrayImage::from_fn(100, 100, |_, _| Luma([128 | (rng.next() & 1) as u8]));
        let image = DynamicImage::ImageLuma8(noise);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.lsb, Verdict::Suspicious);
    }

    #[test]
    fn clean_lsb_plane_is_not_flagged() {
        let image = gray_image(100, 100, |x, _| ((x % 64) * 2) as u8);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.lsb, Verdict::NotSuspicious);
    }

    #[test]
    fn equalized_histogram_pairs_trip_chi_square() {
        // Cada valor 0..=255 aparece la misma cantidad de veces: bins pares e
        // impares idénticos, estadístico cercano a cero.
        let image = gray_image(256, 64, |x, _| x as u8);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.chi_square, Verdict::Suspicious);
    }

    #[test]
    fn skewed_histogram_pairs_do_not_trip_chi_square() {
        // Solo valores pares: cada bin impar queda en cero y el estadístico
        // crece con el tamaño de la muestra.
        let image = gray_image(128, 128, |x, y| (((x + y) % 128) * 2) as u8);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.chi_square, Verdict::NotSuspicious);
    }

    #[test]
    fn large_images_skip_the_expensive_detectors() {
        let image = gray_image(1200, 1200, |x, y| ((x + y) % 256) as u8);
        let report = analyze(&image, &StegoThresholds::default());

        assert_eq!(report.dct, Verdict::SkippedLargeImage);
        assert_eq!(report.sample_pair, Verdict::SkippedLargeImage);
        assert_eq!(report.rs, Verdict::SkippedLargeImage);
        assert_eq!(report.pvd, Verdict::SkippedLargeImage);
        assert!(report.size_gated());

        assert!(matches!(
            report.lsb,
            Verdict::Suspicious | Verdict::NotSuspicious
        ));
        assert!(matches!(
            report.chi_square,
            Verdict::Suspicious | Verdict::NotSuspicious
        ));
    }

    #[test]
    fn verdict_strings_follow_the_alert_contract() {
        assert_eq!(Verdict::Suspicious.to_string(), "suspicious");
        assert_eq!(Verdict::NotSuspicious.to_string(), "not suspicious");
        assert_eq!(
            Verdict::SkippedLargeImage.to_string(),
            "skipped for large image"
        );
        assert_eq!(Verdict::InsufficientData.to_string(), "insufficient data");
        assert_eq!(
            Verdict::Error("boom".to_string()).to_string(),
            "error: boom"
        );
    }

    #[test]
    fn report_serializes_with_stable_keys() {
        let image = gray_image(16, 16, |x, _| (x * 16) as u8);
        let report = analyze(&image, &StegoThresholds::default());
        let json = serde_json::to_value(&report).expect("el reporte debería serializar");
        for key in [
            "LSB_Analysis",
            "Chi_Square_Analysis",
            "DCT_Analysis",
            "Sample_Pair_Analysis",
            "RS_Analysis",
            "PVD_Analysis",
        ] {
            assert!(json.get(key).is_some(), "falta la clave {key}");
        }
    }

    #[test]
    fn dct_of_constant_signal_concentrates_in_dc() {
        let input = [5.0; 8];
        let mut output = [0.0; 8];
        dct_1d(&input, &mut output);
        assert!((output[0] - 5.0 * 8.0_f64.sqrt()).abs() < 1e-9);
        for coefficient in &output[1..] {
            assert!(coefficient.abs() < 1e-9);
        }
    }

    #[test]
    fn dct_preserves_energy() {
        let input = [1.0, -3.0, 2.5, 7.0, 0.0, -1.5, 4.0, 2.0];
        let mut output = [0.0; 8];
        dct_1d(&input, &mut output);
        let energy_in: f64 = input.iter().map(|v| v * v).sum();
        let energy_out: f64 = output.iter().map(|v| v * v).sum();
        assert!((energy_in - energy_out).abs() < 1e-9);
    }

    #[test]
    fn half_and_half_pairing_is_flagged() {
        // Patrón de período 4 con β exactamente 0.5.
        let pattern = [0_u8, 0, 0, 1];
        let image = gray_image(5, 40, move |x, _| pattern[x as usize % 4]);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.sample_pair, Verdict::Suspicious);
    }

    #[test]
    fn uniform_parity_pairing_is_not_flagged() {
        let image = gray_image(50, 50, |_, _| 42);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.sample_pair, Verdict::NotSuspicious);
    }

    #[test]
    fn rs_on_flat_image_reports_insufficient_data() {
        // Bloques sin variación: ningún bloque cae en regular ni singular.
        let image = gray_image(100, 100, |_, _| 200);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.rs, Verdict::InsufficientData);
    }

    #[test]
    fn rs_on_textured_image_produces_a_verdict() {
        let mut rng = Xorshift(0xBADC_0FFE);
        let noise = GrayImage::from_fn(64, 64, |_, _| Luma([(rng.next() % 256) as u8]));
        let image = DynamicImage::ImageLuma8(noise);
        let report = analyze(&image, &StegoThresholds::default());
        assert!(matches!(
            report.rs,
            Verdict::Suspicious | Verdict::NotSuspicious
        ));
    }

    #[test]
    fn few_difference_peaks_do_not_trip_pvd() {
        // Gradiente suave: todas las diferencias valen 1, un único pico.
        let image = gray_image(200, 50, |x, _| x as u8);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.pvd, Verdict::NotSuspicious);
    }

    #[test]
    fn many_equal_difference_peaks_trip_pvd() {
        // Seis diferencias distintas con idéntica frecuencia: seis picos por
        // encima de media + 2σ.
        let row = [0_u8, 1, 3, 6, 10, 15, 21];
        let image = gray_image(7, 100, move |x, _| row[x as usize]);
        let report = analyze(&image, &StegoThresholds::default());
        assert_eq!(report.pvd, Verdict::Suspicious);
    }

    #[test]
    fn detectors_are_deterministic() {
        let image = gray_image(90, 90, |x, y| ((x * 7 + y * 13) % 256) as u8);
        let first = analyze(&image, &StegoThresholds::default());
        let second = analyze(&image, &StegoThresholds::default());
        assert_eq!(first.entries().map(|(_, v)| v.clone()), second.entries().map(|(_, v)| v.clone()));
    }
}
