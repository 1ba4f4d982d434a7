use std::io::{self, BufRead, BufReader, Read};

pub enum HexFileLine {
    Data(Vec<HexFileData>),
    Comment(String),
}

pub enum HexFileData {
    Word(u32),
    Run(u32, u32),
}

/// Logisim `v2.0 raw` image, one control word per entry.
pub struct HexFile {
    pub lines: Vec<HexFileLine>,
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl HexFile {
    pub const fn header() -> &'static str {
        "v2.0 raw"
    }

    pub fn words(&self) -> Vec<u32> {
        let mut words = Vec::new();
        for line in &self.lines {
            match line {
                HexFileLine::Comment(_) => {}
                HexFileLine::Data(data) => {
                    for data in data {
                        match data {
                            HexFileData::Word(w) => words.push(*w),
                            HexFileData::Run(count, w) => {
                                words.extend(std::iter::repeat(*w).take(*count as usize));
                            }
                        }
                    }
                }
            }
        }

        words
    }

    pub fn read<R: Read>(r: R) -> Result<HexFile, io::Error> {
        let file = BufReader::new(r);
        let mut lines = file.lines();

        let header = lines.next().transpose()?.unwrap_or_default();
        if header.trim() != HexFile::header() {
            return Err(invalid(format!("expected '{}' header, found '{}'", HexFile::header(), header)));
        }

        let mut parsed = Vec::new();

        for line in lines {
            let line = line?;
            let line = line.trim();

            if let Some(comment) = line.strip_prefix('#') {
                parsed.push(HexFileLine::Comment(comment.to_string()));
                continue;
            }

            let mut data = Vec::new();

            for block in line.split_whitespace() {
                let parse_word = |s: &str| {
                    u32::from_str_radix(s, 16).map_err(|e| invalid(format!("bad word '{}': {}", s, e)))
                };

                data.push(match block.split_once('*') {
                    Some((count, value)) => HexFileData::Run(
                        count.parse().map_err(|e| invalid(format!("bad run length '{}': {}", count, e)))?,
                        parse_word(value)?,
                    ),
                    None => HexFileData::Word(parse_word(block)?),
                });
            }

            parsed.push(HexFileLine::Data(data));
        }

        Ok(HexFile { lines: parsed })
    }
}
