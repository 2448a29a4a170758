//! Text vector files.
//!
//! ```text
//! <count> <dim>
//! <token> <v1> <v2> ... <vdim>
//! ...
//! ```

use std::io::{BufRead, Write};

use crate::error::{Error, Result};

/// Write a header line followed by one `token v1 .. vdim` line per row.
pub fn write_vectors<'a, W, I>(writer: &mut W, count: usize, dim: usize, rows: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    writeln!(writer, "{count} {dim}")?;
    for (token, values) in rows {
        write!(writer, "{token}")?;
        for v in values {
            write!(writer, " {v}")?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Read a vector file, returning the declared dimension and every row.
///
/// Rows whose width differs from the header are rejected.
pub fn read_vectors<R: BufRead>(reader: R) -> Result<(usize, Vec<(String, Vec<f32>)>)> {
    let mut lines = reader.lines();
    let header = lines
        .next()
        .ok_or_else(|| Error::Format("empty vector file".into()))??;
    let mut fields = header.split_whitespace();
    let parse = |s: Option<&str>, what: &str| -> Result<usize> {
        s.and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Format(format!("vector header is missing {what}")))
    };
    let count = parse(fields.next(), "the row count")?;
    let dim = parse(fields.next(), "the dimension")?;

    let mut rows = Vec::with_capacity(count.min(1 << 20));
    for (n, line) in lines.enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(token) = fields.next() else {
            continue;
        };
        let values = fields
            .map(|f| {
                f.parse::<f32>()
                    .map_err(|e| Error::Format(format!("line {}: {e}", n + 2)))
            })
            .collect::<Result<Vec<f32>>>()?;
        if values.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: values.len(),
            });
        }
        rows.push((token.to_string(), values));
    }
    if rows.len() != count {
        return Err(Error::Format(format!(
            "vector header declares {count} rows, found {}",
            rows.len()
        )));
    }
    Ok((dim, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_then_read() {
        let mut buf = Vec::new();
        let a = [1.0f32, -0.5];
        let b = [0.25f32, 3.0];
        write_vectors(&mut buf, 2, 2, [("a", &a[..]), ("b", &b[..])]).unwrap();
        assert_eq!(String::from_utf8(buf.clone()).unwrap(), "2 2\na 1 -0.5\nb 0.25 3\n");

        let (dim, rows) = read_vectors(Cursor::new(buf)).unwrap();
        assert_eq!(dim, 2);
        assert_eq!(rows[1], ("b".to_string(), vec![0.25, 3.0]));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = read_vectors(Cursor::new("1 3\nx 1 2\n")).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn missing_header_is_a_format_error() {
        assert!(matches!(read_vectors(Cursor::new("")), Err(Error::Format(_))));
        assert!(matches!(read_vectors(Cursor::new("abc\n")), Err(Error::Format(_))));
    }
}
