use std::{
    fs::File,
    io::{
        BufReader,
        BufWriter,
        Read,
        Seek,
        SeekFrom,
        Write,
    },
    path::Path,
};

use crate::{
    deps::log::debug,
    error::Error,
};


pub fn read_u64(rdr: &mut dyn Read) -> Result<u64, Error> {
    let mut buffer = 0u64.to_le_bytes();
    rdr.read_exact(&mut buffer[..])?;
    Ok(u64::from_le_bytes(buffer))
}


pub fn write_u64(
    wtr: &mut dyn Write,
    value: u64,
) -> Result<(), Error> {
    wtr.write_all(&value.to_le_bytes())?;
    Ok(())
}


/// Appends the full contents of `src` to `dst`, used to merge per-region
/// scan scratch files into a single pointer-table spill file.
pub fn cat_file_to_another(
    src: &Path,
    dst: &mut File,
) -> Result<u64, Error> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(dst);
    let copied = std::io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(copied)
}


pub fn new_buffered_file_reader(
    path: &Path,
    offset: Option<std::num::NonZeroU64>,
) -> Result<BufReader<File>, std::io::Error> {
    let mut reader = BufReader::new(open_raw_file(path, offset)?);
    Ok(reader)
}


pub fn open_raw_file(
    path: &Path,
    offset: Option<std::num::NonZeroU64>,
) -> Result<File, std::io::Error> {
    debug!("opening file: {:?}", path);
    let mut reader = std::fs::File::open(&path)?;
    if let Some(start_offset) = offset {
        let seek = SeekFrom::Start(start_offset.get());
        debug!("seek to {} in file: {:?}", start_offset.get(), path);
        reader.seek(seek)?;
    }

    Ok(reader)
}
