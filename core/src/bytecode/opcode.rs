/// Bytecode instruction identifiers.
///
/// The numeric values are an external contract shared with the GS2 compiler;
/// existing compiled programs depend on them, so they must not be renumbered.
/// Gaps in the numbering are deliberate and match the wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    #[default]
    None = 0,
    SetIndex = 1,
    SetIndexTrue = 2,
    Or = 3,
    If = 4,
    And = 5,
    Call = 6,
    Ret = 7,
    Sleep = 8,
    CmdCall = 9,
    Jmp = 10,

    TypeNumber = 20,
    TypeString = 21,
    TypeVar = 22,
    TypeArray = 23,
    TypeTrue = 24,
    TypeFalse = 25,
    TypeNull = 26,
    Pi = 27,
    CopyLastOp = 30,
    SwapLastOps = 31,
    IndexDec = 32,
    ConvToFloat = 33,
    ConvToString = 34,
    MemberAccess = 35,
    ConvToObject = 36,
    ArrayEnd = 37,
    ArrayNew = 38,
    SetArray = 39,
    InlineNew = 40,
    MakeVar = 41,
    NewObject = 42,
    InlineConditional = 44,
    Assign = 50,
    FuncParamsEnd = 51,

    Inc = 52,
    Dec = 53,

    Add = 60,
    Sub = 61,
    Mul = 62,
    Div = 63,
    Mod = 64,
    Pow = 65,

    Not = 68,
    UnarySub = 69,

    Eq = 70,
    Neq = 71,
    Lt = 72,
    Gt = 73,
    Lte = 74,
    Gte = 75,

    Bwo = 76,
    Bwa = 77,

    InRange = 80,
    InObj = 81,
    ObjIndex = 82,
    ObjType = 83,

    Format = 84,
    Int = 85,
    Abs = 86,
    Random = 87,
    Sin = 88,
    Cos = 89,
    Arctan = 90,
    Exp = 91,
    Log = 92,
    Min = 93,
    Max = 94,
    GetAngle = 95,
    GetDir = 96,
    VecX = 97,
    VecY = 98,
    ObjIndices = 99,
    ObjLink = 100,
    Char = 103,
    ObjTrim = 110,
    ObjLength = 111,
    ObjPos = 112,
    Join = 113,
    ObjCharAt = 114,
    ObjSubstr = 115,
    ObjStarts = 116,
    ObjEnds = 117,
    ObjTokenize = 118,
    Translate = 119,
    ObjPositions = 120,
    ObjSize = 130,
    Array = 131,
    ArrayAssign = 132,
    ArrayMultiDim = 133,
    ArrayMultiDimAssign = 134,
    ObjSubarray = 135,
    ObjAddString = 136,
    ObjDeleteString = 137,
    ObjRemoveString = 138,
    ObjReplaceString = 139,
    ObjInsertString = 140,
    ObjClear = 141,
    ArrayNewMultiDim = 142,
    With = 150,
    WithEnd = 151,
    Foreach = 163,
    This = 180,
    ThisO = 181,
    Player = 182,
    PlayerO = 183,
    Level = 184,
    Temp = 189,
    Params = 190,
}

impl Opcode {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Maps a raw bytecode byte to an opcode. Unassigned ids decode as
    /// [`Opcode::None`], which the interpreter treats as a no-op; this keeps
    /// the engine loadable against bytecode from newer compilers.
    pub fn from_id(id: u8) -> Opcode {
        match id {
            1 => Opcode::SetIndex,
            2 => Opcode::SetIndexTrue,
            3 => Opcode::Or,
            4 => Opcode::If,
            5 => Opcode::And,
            6 => Opcode::Call,
            7 => Opcode::Ret,
            8 => Opcode::Sleep,
            9 => Opcode::CmdCall,
            10 => Opcode::Jmp,
            20 => Opcode::TypeNumber,
            21 => Opcode::TypeString,
            22 => Opcode::TypeVar,
            23 => Opcode::TypeArray,
            24 => Opcode::TypeTrue,
            25 => Opcode::TypeFalse,
            26 => Opcode::TypeNull,
            27 => Opcode::Pi,
            30 => Opcode::CopyLastOp,
            31 => Opcode::SwapLastOps,
            32 => Opcode::IndexDec,
            33 => Opcode::ConvToFloat,
            34 => Opcode::ConvToString,
            35 => Opcode::MemberAccess,
            36 => Opcode::ConvToObject,
            37 => Opcode::ArrayEnd,
            38 => Opcode::ArrayNew,
            39 => Opcode::SetArray,
            40 => Opcode::InlineNew,
            41 => Opcode::MakeVar,
            42 => Opcode::NewObject,
            44 => Opcode::InlineConditional,
            50 => Opcode::Assign,
            51 => Opcode::FuncParamsEnd,
            52 => Opcode::Inc,
            53 => Opcode::Dec,
            60 => Opcode::Add,
            61 => Opcode::Sub,
            62 => Opcode::Mul,
            63 => Opcode::Div,
            64 => Opcode::Mod,
            65 => Opcode::Pow,
            68 => Opcode::Not,
            69 => Opcode::UnarySub,
            70 => Opcode::Eq,
            71 => Opcode::Neq,
            72 => Opcode::Lt,
            73 => Opcode::Gt,
            74 => Opcode::Lte,
            75 => Opcode::Gte,
            76 => Opcode::Bwo,
            77 => Opcode::Bwa,
            80 => Opcode::InRange,
            81 => Opcode::InObj,
            82 => Opcode::ObjIndex,
            83 => Opcode::ObjType,
            84 => Opcode::Format,
            85 => Opcode::Int,
            86 => Opcode::Abs,
            87 => Opcode::Random,
            88 => Opcode::Sin,
            89 => Opcode::Cos,
            90 => Opcode::Arctan,
            91 => Opcode::Exp,
            92 => Opcode::Log,
            93 => Opcode::Min,
            94 => Opcode::Max,
            95 => Opcode::GetAngle,
            96 => Opcode::GetDir,
            97 => Opcode::VecX,
            98 => Opcode::VecY,
            99 => Opcode::ObjIndices,
            100 => Opcode::ObjLink,
            103 => Opcode::Char,
            110 => Opcode::ObjTrim,
            111 => Opcode::ObjLength,
            112 => Opcode::ObjPos,
            113 => Opcode::Join,
            114 => Opcode::ObjCharAt,
            115 => Opcode::ObjSubstr,
            116 => Opcode::ObjStarts,
            117 => Opcode::ObjEnds,
            118 => Opcode::ObjTokenize,
            119 => Opcode::Translate,
            120 => Opcode::ObjPositions,
            130 => Opcode::ObjSize,
            131 => Opcode::Array,
            132 => Opcode::ArrayAssign,
            133 => Opcode::ArrayMultiDim,
            134 => Opcode::ArrayMultiDimAssign,
            135 => Opcode::ObjSubarray,
            136 => Opcode::ObjAddString,
            137 => Opcode::ObjDeleteString,
            138 => Opcode::ObjRemoveString,
            139 => Opcode::ObjReplaceString,
            140 => Opcode::ObjInsertString,
            141 => Opcode::ObjClear,
            142 => Opcode::ArrayNewMultiDim,
            150 => Opcode::With,
            151 => Opcode::WithEnd,
            163 => Opcode::Foreach,
            180 => Opcode::This,
            181 => Opcode::ThisO,
            182 => Opcode::Player,
            183 => Opcode::PlayerO,
            184 => Opcode::Level,
            189 => Opcode::Temp,
            190 => Opcode::Params,
            _ => Opcode::None,
        }
    }
}
