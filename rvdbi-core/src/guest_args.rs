//! Guest argv/envp registration (spec §6 "register guest argv/envp"):
//! builds a Newlib crt0-style initial stack image so a freshly started
//! guest finds `argc`/`argv`/`envp` exactly where it expects them
//! relative to `sp`, the same layout the real C runtime's startup code
//! walks before calling `main`.
//!
//! The image lives in its own region, not among the ELF's own data
//! segments — it is synthesized by the engine at registration time,
//! never present in the binary on disk.

/// Default guest stack region: 8 MiB, ending just below this address.
/// Newlib programs don't care what address the stack lives at, only
/// that `sp` is valid and 16-byte aligned and that `argc`/`argv`/`envp`
/// sit above it the way crt0 expects.
pub const STACK_TOP: u64 = 0x7fff_f000;
pub const STACK_SIZE: u64 = 8 * 1024 * 1024;

/// A built stack image: the bytes to back with real memory at
/// `base_address`, and the `sp` value a guest should start with to see
/// them as a standards-shaped argc/argv/envp/auxv block.
pub struct StackImage {
    pub base_address: u64,
    pub bytes: Vec<u8>,
    pub initial_sp: u64,
}

/// Build a stack image in the default region (see [`STACK_TOP`]/
/// [`STACK_SIZE`]) for the given guest command-line and environment.
pub fn build_stack_image(argv: &[String], envp: &[String]) -> StackImage {
    build_stack_image_at(argv, envp, STACK_TOP, STACK_SIZE)
}

/// Build a stack image occupying `[stack_top - stack_size, stack_top)`.
///
/// Layout from `base_address` upward: the packed, NUL-terminated argv
/// strings, then the packed envp strings, padding to a 16-byte
/// boundary, then `argc`, `argc+1` argv pointers (NULL-terminated),
/// `envp.len()+1` envp pointers (NULL-terminated), and a single
/// `AT_NULL` auxv entry. `initial_sp` points at the `argc` word, which
/// is where `_start` expects to find it.
pub fn build_stack_image_at(argv: &[String], envp: &[String], stack_top: u64, stack_size: u64) -> StackImage {
    let base_address = stack_top - stack_size;

    let mut strings = Vec::new();
    let mut argv_addrs = Vec::with_capacity(argv.len());
    let mut envp_addrs = Vec::with_capacity(envp.len());

    for s in argv {
        argv_addrs.push(base_address + strings.len() as u64);
        strings.extend_from_slice(s.as_bytes());
        strings.push(0);
    }
    for s in envp {
        envp_addrs.push(base_address + strings.len() as u64);
        strings.extend_from_slice(s.as_bytes());
        strings.push(0);
    }
    while strings.len() % 16 != 0 {
        strings.push(0);
    }

    let table_base = base_address + strings.len() as u64;

    let mut table = Vec::new();
    table.extend_from_slice(&(argv.len() as u64).to_le_bytes());
    for a in &argv_addrs {
        table.extend_from_slice(&a.to_le_bytes());
    }
    table.extend_from_slice(&0u64.to_le_bytes());
    for a in &envp_addrs {
        table.extend_from_slice(&a.to_le_bytes());
    }
    table.extend_from_slice(&0u64.to_le_bytes());
    // AT_NULL auxv terminator: a single (tag, value) pair of zeros.
    table.extend_from_slice(&0u64.to_le_bytes());
    table.extend_from_slice(&0u64.to_le_bytes());

    let mut bytes = strings;
    bytes.extend_from_slice(&table);
    debug_assert!(
        bytes.len() as u64 <= stack_size,
        "argv/envp too large for the {stack_size}-byte guest stack region"
    );

    StackImage {
        base_address,
        bytes,
        initial_sp: table_base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u64(bytes: &[u8], offset: usize) -> u64 {
        u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
    }

    #[test]
    fn initial_sp_is_sixteen_byte_aligned() {
        let image = build_stack_image(&["prog".into(), "a".into()], &["X=1".into()]);
        assert_eq!(image.initial_sp % 16, 0);
    }

    #[test]
    fn argc_and_argv_table_round_trip() {
        let argv = vec!["prog".to_string(), "hello".to_string()];
        let envp = vec!["X=1".to_string()];
        let image = build_stack_image(&argv, &envp);
        let table_offset = (image.initial_sp - image.base_address) as usize;

        let argc = read_u64(&image.bytes, table_offset);
        assert_eq!(argc, 2);

        let argv0_addr = read_u64(&image.bytes, table_offset + 8);
        let argv1_addr = read_u64(&image.bytes, table_offset + 16);
        let argv_null = read_u64(&image.bytes, table_offset + 24);
        assert_eq!(argv_null, 0);

        let s0_off = (argv0_addr - image.base_address) as usize;
        let s1_off = (argv1_addr - image.base_address) as usize;
        assert!(image.bytes[s0_off..].starts_with(b"prog\0"));
        assert!(image.bytes[s1_off..].starts_with(b"hello\0"));

        let envp0_addr = read_u64(&image.bytes, table_offset + 32);
        let envp_null = read_u64(&image.bytes, table_offset + 40);
        assert_eq!(envp_null, 0);
        let e0_off = (envp0_addr - image.base_address) as usize;
        assert!(image.bytes[e0_off..].starts_with(b"X=1\0"));

        let auxv_tag = read_u64(&image.bytes, table_offset + 48);
        let auxv_val = read_u64(&image.bytes, table_offset + 56);
        assert_eq!((auxv_tag, auxv_val), (0, 0));
    }

    #[test]
    fn empty_argv_and_envp_still_produce_a_valid_stack() {
        let image = build_stack_image(&[], &[]);
        let table_offset = (image.initial_sp - image.base_address) as usize;
        assert_eq!(read_u64(&image.bytes, table_offset), 0);
        // argv NULL terminator immediately follows argc.
        assert_eq!(read_u64(&image.bytes, table_offset + 8), 0);
        // envp NULL terminator immediately follows.
        assert_eq!(read_u64(&image.bytes, table_offset + 16), 0);
    }
}
