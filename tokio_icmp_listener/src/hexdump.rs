use std::io::{self, Write};

/// Writes `data` as hex, `width` bytes per line, each line prefixed by its offset.
pub fn hex_dump<W: Write + ?Sized>(data: &[u8], out: &mut W, width: usize) -> io::Result<()> {
    if width == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "hex dump width must be non zero",
        ));
    }
    for (i, line) in data.chunks(width).enumerate() {
        write!(out, "{:04x}: ", i * width)?;
        for byte in line {
            write!(out, "{:02x} ", byte)?;
        }
        writeln!(out)?;
    }
    if data.is_empty() {
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn dump(data: &[u8], width: usize) -> String {
        let mut out = vec![];
        hex_dump(data, &mut out, width).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn lines_and_offsets() {
        let data: Vec<u8> = (0..20).collect();
        assert_eq!(
            dump(&data, 8),
            "0000: 00 01 02 03 04 05 06 07 \n\
             0008: 08 09 0a 0b 0c 0d 0e 0f \n\
             0010: 10 11 12 13 \n"
        );
    }

    #[test]
    fn empty() {
        assert_eq!(dump(&[], 16), "\n");
    }

    #[test]
    fn zero_width() {
        let mut out = vec![];
        assert!(hex_dump(&[1, 2], &mut out, 0).is_err());
    }
}
