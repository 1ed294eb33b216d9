//! DNA 碱基编码与 k-mer key 打包。
//!
//! 2-bit 编码按字母序固定：A=0, C=1, G=2, T=3。编码与解码必须使用同一张表，
//! 索引文件中持久化的 key 也依赖它，不可改动。

/// key 的最大宽度（碱基数）。u32 key 每碱基 2 bit，最多 16 个。
pub const MAX_KEY_WIDTH: u32 = 16;

/// 歧义碱基。任何非 ACGT 的输入都归一化为 N。
pub const AMBIGUOUS: u8 = b'N';

/// 大写 A/C/G/T 的 2-bit 编码；其余（N、分隔符 0、杂字符）返回 None。
#[inline]
pub fn base_code(b: u8) -> Option<u8> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// 2-bit 编码还原为碱基字母。
#[inline]
pub fn code_base(code: u8) -> u8 {
    match code & 3 {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        _ => b'T',
    }
}

/// 单碱基归一化：统一大写，U 视为 T，其余非 ACGT 一律折叠为 N。
#[inline]
pub fn normalize_base(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        c @ (b'A' | b'C' | b'G' | b'T') => c,
        b'U' => b'T',
        _ => AMBIGUOUS,
    }
}

/// 把 `width` 个碱基打包为 key，首碱基在最高位。
/// 任何一个碱基含歧义则返回 None。`bases` 长度必须不小于 `width`。
pub fn pack_key(bases: &[u8], width: u32) -> Option<u32> {
    debug_assert!(width >= 1 && width <= MAX_KEY_WIDTH);
    debug_assert!(bases.len() >= width as usize);
    let mut key = 0u32;
    for &b in &bases[..width as usize] {
        key = (key << 2) | u32::from(base_code(b)?);
    }
    Some(key)
}

/// key 还原为碱基字符串（dump 工具用）。
pub fn unpack_key(key: u32, width: u32) -> String {
    let mut out = String::with_capacity(width as usize);
    for i in (0..width).rev() {
        out.push(char::from(code_base((key >> (2 * i)) as u8)));
    }
    out
}

/// `width` 位 key 的低位掩码；width=16 时覆盖整个 u32。
#[inline]
pub fn key_mask(width: u32) -> u32 {
    if width >= MAX_KEY_WIDTH {
        u32::MAX
    } else {
        (1u32 << (2 * width)) - 1
    }
}

/// `width` 位 key 的 slot 总数（4^width）。
#[inline]
pub fn slot_count(width: u32) -> u64 {
    1u64 << (2 * width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for b in [b'A', b'C', b'G', b'T'] {
            assert_eq!(code_base(base_code(b).unwrap()), b);
        }
        assert_eq!(base_code(b'N'), None);
        assert_eq!(base_code(0), None);
        assert_eq!(base_code(b'a'), None); // 编码前必须已归一化
    }

    #[test]
    fn codes_are_alphabetical() {
        assert_eq!(base_code(b'A'), Some(0));
        assert_eq!(base_code(b'C'), Some(1));
        assert_eq!(base_code(b'G'), Some(2));
        assert_eq!(base_code(b'T'), Some(3));
    }

    #[test]
    fn normalize_folds_junk_to_n() {
        assert_eq!(normalize_base(b'a'), b'A');
        assert_eq!(normalize_base(b'u'), b'T');
        assert_eq!(normalize_base(b'x'), b'N');
        assert_eq!(normalize_base(b'-'), b'N');
    }

    #[test]
    fn pack_key_msb_first() {
        // "ACGT" -> 00 01 10 11
        assert_eq!(pack_key(b"ACGT", 4), Some(0b00_01_10_11));
        assert_eq!(unpack_key(0b00_01_10_11, 4), "ACGT");
    }

    #[test]
    fn pack_key_rejects_ambiguous() {
        assert_eq!(pack_key(b"ACNT", 4), None);
        assert_eq!(pack_key(b"ACG\0", 4), None);
    }

    #[test]
    fn pack_key_full_width() {
        let bases = b"ACGTACGTACGTACGT";
        let key = pack_key(bases, 16).unwrap();
        assert_eq!(unpack_key(key, 16), "ACGTACGTACGTACGT");
        assert_eq!(key_mask(16), u32::MAX);
        assert_eq!(slot_count(8), 65_536);
    }
}
