//! Numeric dataset loading and mini-batching.
//!
//! One example per line; values separated by commas and/or whitespace.
//! Blank lines and lines starting with `#` are skipped.

use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

/// Parse a matrix from text.
pub fn parse_matrix(text: &str) -> Result<Array2<f32>> {
    let mut values = Vec::new();
    let mut width: Option<usize> = None;
    let mut rows = 0;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = values.len();
        for field in line.split(|c: char| c == ',' || c.is_whitespace()) {
            if field.is_empty() {
                continue;
            }
            let v: f32 = field
                .parse()
                .with_context(|| format!("line {}: invalid number '{}'", line_no + 1, field))?;
            values.push(v);
        }
        let count = values.len() - before;
        match width {
            None => width = Some(count),
            Some(w) if w != count => bail!(
                "line {}: expected {} values, found {}",
                line_no + 1,
                w,
                count
            ),
            Some(_) => {}
        }
        rows += 1;
    }

    let width = width.unwrap_or(0);
    ensure!(rows > 0 && width > 0, "dataset is empty");
    Ok(Array2::from_shape_vec((rows, width), values)?)
}

/// Load a matrix from a file.
pub fn load_matrix(path: &Path) -> Result<Array2<f32>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset '{}'", path.display()))?;
    parse_matrix(&text).with_context(|| format!("failed to parse dataset '{}'", path.display()))
}

/// Write a matrix in the format [`load_matrix`] reads, one row per line.
pub fn write_matrix(path: &Path, data: &Array2<f32>) -> Result<()> {
    let mut text = String::new();
    for row in data.rows() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        text.push_str(&line.join(" "));
        text.push('\n');
    }
    fs::write(path, text).with_context(|| format!("failed to write matrix '{}'", path.display()))
}

/// Row-index chunks of at most `batch_size`, shuffled when an RNG is given.
pub fn batch_indices<R: Rng + ?Sized>(rows: usize, batch_size: usize, rng: Option<&mut R>) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..rows).collect();
    if let Some(rng) = rng {
        order.shuffle(rng);
    }
    order
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Gather the rows named by `indices`.
pub fn gather(data: &Array2<f32>, indices: &[usize]) -> Array2<f32> {
    data.select(Axis(0), indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn test_parse_mixed_separators() {
        let m = parse_matrix("# header\n1, 2 ,3\n\n4\t5 6\n").unwrap();
        assert_eq!(m.dim(), (2, 3));
        assert_eq!(m[[1, 2]], 6.0);
    }

    #[test]
    fn test_parse_rejects_ragged_rows() {
        let err = parse_matrix("1,2\n3\n").expect_err("ragged rows should error");
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_matrix("1,x\n").is_err());
        assert!(parse_matrix("\n# only comments\n").is_err());
    }

    #[test]
    fn test_load_matrix_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.5 1.5").unwrap();
        writeln!(file, "2.5 3.5").unwrap();
        let m = load_matrix(file.path()).unwrap();
        assert_eq!(m.dim(), (2, 2));
        assert_eq!(m[[1, 0]], 2.5);
    }

    #[test]
    fn test_written_matrix_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latent.txt");
        let data = Array2::from_shape_fn((3, 2), |(i, j)| i as f32 * 0.1 - j as f32 / 3.0);
        write_matrix(&path, &data).unwrap();
        assert_eq!(load_matrix(&path).unwrap(), data);

        let missing = dir.path().join("no_such_dir").join("out.txt");
        assert!(write_matrix(&missing, &data).is_err());
    }

    #[test]
    fn test_batches_cover_every_row_once() {
        let mut rng = StdRng::seed_from_u64(1);
        let batches = batch_indices(10, 4, Some(&mut rng));
        assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
        let mut all: Vec<usize> = batches.concat();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_unshuffled_batches_in_order() {
        let batches = batch_indices::<StdRng>(5, 2, None);
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_gather_rows() {
        let data = Array2::from_shape_fn((4, 2), |(i, j)| (i * 10 + j) as f32);
        let g = gather(&data, &[3, 1]);
        assert_eq!(g[[0, 0]], 30.0);
        assert_eq!(g[[1, 1]], 11.0);
    }
}
