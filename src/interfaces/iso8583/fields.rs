/// Wire layout of a single data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    /// Exactly this many characters, no prefix.
    Fixed(usize),
    /// Two ASCII digit length prefix, value up to the given maximum.
    LlVar(usize),
    /// Three ASCII digit length prefix, value up to the given maximum.
    LllVar(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub number: u8,
    pub name: &'static str,
    pub format: FieldFormat,
}

const fn fixed(number: u8, name: &'static str, len: usize) -> FieldSpec {
    FieldSpec {
        number,
        name,
        format: FieldFormat::Fixed(len),
    }
}

const fn llvar(number: u8, name: &'static str, max: usize) -> FieldSpec {
    FieldSpec {
        number,
        name,
        format: FieldFormat::LlVar(max),
    }
}

const fn lllvar(number: u8, name: &'static str, max: usize) -> FieldSpec {
    FieldSpec {
        number,
        name,
        format: FieldFormat::LllVar(max),
    }
}

// Fields 2..=64. Binary elements (52, 53, 64) travel as upper-case hex, so
// their widths are in hex digits. 53 carries a 10 byte KSN.
const FIELDS: [FieldSpec; 63] = [
    llvar(2, "primary account number", 19),
    fixed(3, "processing code", 6),
    fixed(4, "transaction amount", 12),
    fixed(5, "settlement amount", 12),
    fixed(6, "cardholder billing amount", 12),
    fixed(7, "transmission date and time", 10),
    fixed(8, "cardholder billing fee", 8),
    fixed(9, "settlement conversion rate", 8),
    fixed(10, "cardholder billing conversion rate", 8),
    fixed(11, "system trace audit number", 6),
    fixed(12, "local transaction time", 6),
    fixed(13, "local transaction date", 4),
    fixed(14, "expiration date", 4),
    fixed(15, "settlement date", 4),
    fixed(16, "conversion date", 4),
    fixed(17, "capture date", 4),
    fixed(18, "merchant category code", 4),
    fixed(19, "acquiring institution country", 3),
    fixed(20, "PAN extended country", 3),
    fixed(21, "forwarding institution country", 3),
    fixed(22, "POS entry mode", 3),
    fixed(23, "card sequence number", 3),
    fixed(24, "network international identifier", 3),
    fixed(25, "POS condition code", 2),
    fixed(26, "POS PIN capture code", 2),
    fixed(27, "authorization response length", 1),
    fixed(28, "transaction fee", 9),
    fixed(29, "settlement fee", 9),
    fixed(30, "transaction processing fee", 9),
    fixed(31, "settlement processing fee", 9),
    llvar(32, "acquiring institution id", 11),
    llvar(33, "forwarding institution id", 11),
    llvar(34, "extended PAN", 28),
    llvar(35, "track 2 data", 37),
    lllvar(36, "track 3 data", 104),
    fixed(37, "retrieval reference number", 12),
    fixed(38, "authorization id response", 6),
    fixed(39, "response code", 2),
    fixed(40, "service restriction code", 3),
    fixed(41, "card acceptor terminal id", 8),
    fixed(42, "card acceptor id", 15),
    fixed(43, "card acceptor name and location", 40),
    llvar(44, "additional response data", 25),
    llvar(45, "track 1 data", 76),
    lllvar(46, "additional data ISO", 999),
    lllvar(47, "additional data national", 999),
    lllvar(48, "additional data private", 999),
    fixed(49, "transaction currency", 3),
    fixed(50, "settlement currency", 3),
    fixed(51, "billing currency", 3),
    fixed(52, "PIN block", 32),
    fixed(53, "key serial number", 20),
    lllvar(54, "additional amounts", 120),
    lllvar(55, "ICC data", 999),
    lllvar(56, "reserved ISO", 999),
    lllvar(57, "reserved national", 999),
    lllvar(58, "reserved national", 999),
    lllvar(59, "reserved national", 999),
    lllvar(60, "reserved private", 999),
    lllvar(61, "reserved private", 999),
    lllvar(62, "reserved private", 999),
    lllvar(63, "response signature", 999),
    fixed(64, "message authentication code", 16),
];

/// Looks up the layout of a field in the primary bitmap range.
pub fn spec(field: u8) -> Option<&'static FieldSpec> {
    if (2..=64).contains(&field) {
        FIELDS.get(usize::from(field) - 2)
    } else {
        None
    }
}
