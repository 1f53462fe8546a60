//! Packed on-disk layouts for every table the patcher touches.
//!
//! Records are tightly packed with no alignment gaps, so the serialized size
//! is the sum of the field widths. Byte order belongs to the record type:
//! the battle, shop, chest and search-point tables are little-endian while
//! the item table and its sort index are big-endian.

use std::borrow::Cow;
use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Result, VesperiaError};

pub const ARTES_MAGIC: &[u8; 8] = b"T8BTMA  ";
pub const SKILLS_MAGIC: &[u8; 8] = b"T8BTSK  ";
pub const SEARCH_POINT_MAGIC: &[u8; 8] = b"TOVSEAF\0";

/// A single fixed-width value inside a packed record.
pub trait Field: Sized {
    const WIDTH: usize;

    fn read<B: ByteOrder>(buf: &[u8]) -> Self;
    fn write<B: ByteOrder>(&self, buf: &mut [u8]);
}

macro_rules! scalar_field {
    ($ty:ty, $width:expr, $read:ident, $write:ident) => {
        impl Field for $ty {
            const WIDTH: usize = $width;

            fn read<B: ByteOrder>(buf: &[u8]) -> Self {
                B::$read(buf)
            }

            fn write<B: ByteOrder>(&self, buf: &mut [u8]) {
                B::$write(buf, *self)
            }
        }
    };
}

scalar_field!(u16, 2, read_u16, write_u16);
scalar_field!(u32, 4, read_u32, write_u32);
scalar_field!(u64, 8, read_u64, write_u64);
scalar_field!(i32, 4, read_i32, write_i32);
scalar_field!(f32, 4, read_f32, write_f32);

impl<const N: usize> Field for [u32; N] {
    const WIDTH: usize = 4 * N;

    fn read<B: ByteOrder>(buf: &[u8]) -> Self {
        let mut words = [0u32; N];
        B::read_u32_into(&buf[..4 * N], &mut words);
        words
    }

    fn write<B: ByteOrder>(&self, buf: &mut [u8]) {
        B::write_u32_into(self, &mut buf[..4 * N]);
    }
}

/// NUL-padded character array. Serializes as a string with the trailing
/// padding removed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedString<const N: usize>(pub [u8; N]);

impl<const N: usize> FixedString<N> {
    pub fn new(text: &str) -> Self {
        let mut bytes = [0u8; N];
        let src = text.as_bytes();
        let len = src.len().min(N);
        bytes[..len].copy_from_slice(&src[..len]);
        Self(bytes)
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl<const N: usize> Default for FixedString<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> Field for FixedString<N> {
    const WIDTH: usize = N;

    fn read<B: ByteOrder>(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        Self(bytes)
    }

    fn write<B: ByteOrder>(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.0);
    }
}

impl<const N: usize> Serialize for FixedString<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedString<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::new(&text))
    }
}

/// A record with a known packed layout.
pub trait Record: Sized {
    const NAME: &'static str;
    /// Size of the fixed part of the record.
    const SIZE: usize;

    fn byte_len(&self) -> usize {
        Self::SIZE
    }

    fn decode(buf: &[u8], offset: usize) -> Result<Self>;

    /// Writes exactly `byte_len()` bytes at the start of `out`.
    fn encode_into(&self, out: &mut [u8]);

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.byte_len()];
        self.encode_into(&mut out);
        out
    }
}

pub(crate) fn ensure_len(
    record: &'static str,
    buf: &[u8],
    offset: usize,
    needed: usize,
) -> Result<()> {
    let available = buf.len().saturating_sub(offset);
    if available < needed {
        return Err(VesperiaError::MalformedRecord {
            record,
            offset,
            reason: format!("needed {needed} bytes, {available} available"),
        });
    }
    Ok(())
}

pub(crate) fn verify_magic<const N: usize>(
    record: &'static str,
    found: &FixedString<N>,
    expected: &[u8; N],
) -> Result<()> {
    if &found.0 != expected {
        return Err(VesperiaError::MalformedRecord {
            record,
            offset: 0,
            reason: format!(
                "expected magic {:?}, found {:?}",
                String::from_utf8_lossy(expected),
                found.as_str()
            ),
        });
    }
    Ok(())
}

macro_rules! record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident<$order:ty> {
            $( $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $( pub $field: $ty, )*
        }

        impl Record for $name {
            const NAME: &'static str = stringify!($name);
            const SIZE: usize = 0 $( + <$ty as Field>::WIDTH )*;

            #[allow(unused_assignments)]
            fn decode(buf: &[u8], offset: usize) -> Result<Self> {
                ensure_len(Self::NAME, buf, offset, Self::SIZE)?;
                let mut at = offset;
                $(
                    let $field = <$ty as Field>::read::<$order>(&buf[at..at + <$ty as Field>::WIDTH]);
                    at += <$ty as Field>::WIDTH;
                )*
                Ok(Self { $( $field, )* })
            }

            #[allow(unused_assignments)]
            fn encode_into(&self, out: &mut [u8]) {
                let mut at = 0;
                $(
                    self.$field.write::<$order>(&mut out[at..at + <$ty as Field>::WIDTH]);
                    at += <$ty as Field>::WIDTH;
                )*
            }
        }
    };
}

record! {
    /// Header of the battle arte table (`T8BTMA`).
    pub struct ArtesHeader<LittleEndian> {
        magic_number: FixedString<8>,
        entries: u32,
        entry_end: u32,
    }
}

impl ArtesHeader {
    pub fn verify(&self) -> Result<()> {
        verify_magic(Self::NAME, &self.magic_number, ARTES_MAGIC)
    }
}

record! {
    /// Fixed part of an arte record. The character id list follows it.
    pub struct ArteEntryHead<LittleEndian> {
        next_entry_offset: u32,
        entry: u32,
        id: u32,
        unknown0: u64,
        string_pointer: u64,
        name_string_key: u32,
        desc_string_key: u32,
        arte_type: u32,
        tp_cost: u32,
        power: u32,
        fire_power: u32,
        earth_power: u32,
        wind_power: u32,
        water_power: u32,
        light_power: u32,
        dark_power: u32,
        unknown_power: u32,
        semi_auto_range_min: u32,
        semi_auto_range_max: u32,
        unknown1: u32,
        unknown2: u32,
        cast_time: u32,
        learn_condition1: u32,
        learn_condition2: u32,
        learn_condition3: u32,
        learn_condition4: u32,
        learn_condition5: u32,
        learn_condition6: u32,
        learn_parameter1: u32,
        learn_parameter2: u32,
        learn_parameter3: u32,
        learn_parameter4: u32,
        learn_parameter5: u32,
        learn_parameter6: u32,
        unknown3: u32,
        unknown4: u32,
        unknown5: u32,
        unknown6: u32,
        unknown7: u32,
        unknown8: u32,
        unknown9: u32,
        magic_attack_mod: u32,
        unknown10: f32,
        casting_circle_type: u32,
        is_usable_outside_battle: u32,
        target_type: u32,
        vs_human_power: u32,
        vs_beast_power: u32,
        vs_bird_power: u32,
        vs_magic_power: u32,
        vs_plant_power: u32,
        vs_aquatic_power: u32,
        vs_insect_power: u32,
        vs_inorganic_power: u32,
        vs_scale_power: u32,
        vs_small_power: u32,
        vs_normal_power: u32,
        vs_big_power: u32,
        vs_large_power: u32,
        status_effect1: u32,
        status_effect2: u32,
        status_effect3: u32,
        status_effect1_parameter: u32,
        status_effect2_parameter: u32,
        status_effect3_parameter: u32,
        ground_enable_uses: i32,
        aerial_enable_uses: i32,
        aerial_enable_skill1: u32,
        aerial_enable_skill2: u32,
        can_evolve: u32,
        evolve_condition1: u32,
        evolve_condition2: u32,
        evolve_condition3: u32,
        evolve_condition4: u32,
        evolve_base: u32,
        evolve_parameter1: u32,
        evolve_parameter2: u32,
        evolve_parameter3: u32,
        evolve_parameter4: u32,
        physical_attack_mod: u32,
        unknown11: u32,
        unknown12: u32,
        unknown13: u32,
        fatal_strike_type: u32,
        day_weather_power: u32,
        cloudy_weather_power: u32,
        fog_weather_power: u32,
        night_weather_power: u32,
        rain_weather_power: u32,
        snow_weather_power: u32,
        sandstorm_weather_power: u32,
        evening_weather_power: u32,
        semi_auto_range_max_advance: u32,
        semi_auto_range_max_brainiac: u32,
        semi_auto_range_max_critical: u32,
        character_id_entries: u32,
    }
}

/// Arte record: the fixed head plus `character_id_entries` trailing ids.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArteEntry {
    #[serde(flatten)]
    pub head: ArteEntryHead,
    #[serde(default)]
    pub character_ids: Vec<u32>,
}

impl ArteEntry {
    /// Owning character, if any.
    pub fn first_character(&self) -> Option<u32> {
        self.character_ids.first().copied()
    }
}

impl Record for ArteEntry {
    const NAME: &'static str = "ArteEntry";
    const SIZE: usize = ArteEntryHead::SIZE;

    fn byte_len(&self) -> usize {
        Self::SIZE + 4 * self.character_ids.len()
    }

    fn decode(buf: &[u8], offset: usize) -> Result<Self> {
        let head = ArteEntryHead::decode(buf, offset)?;
        let count = head.character_id_entries as usize;
        let tail = offset + Self::SIZE;
        ensure_len(Self::NAME, buf, tail, 4 * count)?;

        let character_ids = buf[tail..tail + 4 * count]
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect();
        Ok(Self { head, character_ids })
    }

    fn encode_into(&self, out: &mut [u8]) {
        let mut head = self.head;
        head.character_id_entries = self.character_ids.len() as u32;
        head.encode_into(&mut out[..Self::SIZE]);

        for (i, id) in self.character_ids.iter().enumerate() {
            let at = Self::SIZE + 4 * i;
            LittleEndian::write_u32(&mut out[at..at + 4], *id);
        }
    }
}

record! {
    /// Header of the battle skill table (`T8BTSK`).
    pub struct SkillsHeader<LittleEndian> {
        magic_number: FixedString<8>,
        entries: u32,
        entry_end: u32,
    }
}

impl SkillsHeader {
    pub fn verify(&self) -> Result<()> {
        verify_magic(Self::NAME, &self.magic_number, SKILLS_MAGIC)
    }
}

record! {
    pub struct SkillEntry<LittleEndian> {
        next_entry_offset: u32,
        entry: u32,
        id: u32,
        string_pointer: u64,
        name_string_key: u32,
        desc_string_key: u32,
        unknown1: u32,
        unknown2: u32,
        sp_cost: u32,
        lp_cost: u32,
        symbol: u32,
        symbol_weight: u32,
        paramater1: f32,
        paramater2: f32,
        paramater3: f32,
        is_equippable: u32,
    }
}

record! {
    /// One row of `ITEM.DAT`. The file has no header.
    pub struct ItemEntry<BigEndian> {
        id: u32,
        name_string_key: u32,
        buy_price: u32,
        menu_use_type: u32,
        character_usable: u32,
        unknown0: u32,
        icon: u32,
        category: u32,
        picture: FixedString<32>,
        unknown1: u32,
        desc1_string_key: u32,
        battle_use_type: u32,
        phy_attack: u32,
        magic_attack: u32,
        phy_defense: u32,
        magic_defense: u32,
        tp_heal: u32,
        luck: u32,
        agility: u32,
        phys_attack_increase: u32,
        phys_defense_increase: u32,
        fire_power: u32,
        water_power: u32,
        wind_power: u32,
        earth_power: u32,
        light_power: u32,
        dark_power: u32,
        skill1: u32,
        skill1_lp: u32,
        skill2: u32,
        skill2_lp: u32,
        skill3: u32,
        skill3_lp: u32,
        parameter22: u32,
        parameter23: u32,
        parameter24: u32,
        desc2_string_key: u32,
        enemy_drop1: u32,
        enemy_drop2: u32,
        enemy_drop3: u32,
        enemy_drop4: u32,
        enemy_drop5: u32,
        enemy_drop6: u32,
        enemy_drop7: u32,
        enemy_drop8: u32,
        enemy_drop9: u32,
        enemy_drop10: u32,
        enemy_drop11: u32,
        enemy_drop12: u32,
        enemy_drop13: u32,
        enemy_drop14: u32,
        enemy_drop15: u32,
        enemy_drop16: u32,
        enemy_drop1_chance: u32,
        enemy_drop2_chance: u32,
        enemy_drop3_chance: u32,
        enemy_drop4_chance: u32,
        enemy_drop5_chance: u32,
        enemy_drop6_chance: u32,
        enemy_drop7_chance: u32,
        enemy_drop8_chance: u32,
        enemy_drop9_chance: u32,
        enemy_drop10_chance: u32,
        enemy_drop11_chance: u32,
        enemy_drop12_chance: u32,
        enemy_drop13_chance: u32,
        enemy_drop14_chance: u32,
        enemy_drop15_chance: u32,
        enemy_drop16_chance: u32,
        enemy_steal1: u32,
        enemy_steal2: u32,
        enemy_steal3: u32,
        enemy_steal4: u32,
        enemy_steal5: u32,
        enemy_steal6: u32,
        enemy_steal7: u32,
        enemy_steal8: u32,
        enemy_steal9: u32,
        enemy_steal10: u32,
        enemy_steal11: u32,
        enemy_steal12: u32,
        enemy_steal13: u32,
        enemy_steal14: u32,
        enemy_steal15: u32,
        enemy_steal16: u32,
        enemy_steal1_chance: u32,
        enemy_steal2_chance: u32,
        enemy_steal3_chance: u32,
        enemy_steal4_chance: u32,
        enemy_steal5_chance: u32,
        enemy_steal6_chance: u32,
        enemy_steal7_chance: u32,
        enemy_steal8_chance: u32,
        enemy_steal9_chance: u32,
        enemy_steal10_chance: u32,
        enemy_steal11_chance: u32,
        enemy_steal12_chance: u32,
        enemy_steal13_chance: u32,
        enemy_steal14_chance: u32,
        enemy_steal15_chance: u32,
        enemy_steal16_chance: u32,
        location1: u32,
        location2: u32,
        location3: u32,
        recipe1: u32,
        recipe2: u32,
        recipe3: u32,
        recipe4: u32,
        unknown2: u32,
        unknown3: u32,
        unknown4: u32,
        unknown5: u32,
        unknown6: u32,
        synth1_level: u32,
        synth1_cost: u32,
        synth1_unknown: u32,
        synth1_material1: u32,
        synth1_material1_amount: u32,
        synth1_material2: u32,
        synth1_material2_amount: u32,
        synth1_material3: u32,
        synth1_material3_amount: u32,
        synth1_material4: u32,
        synth1_material4_amount: u32,
        synth1_material5: u32,
        synth1_material5_amount: u32,
        synth1_material6: u32,
        synth1_material6_amount: u32,
        synth1_material_size: u32,
        synth2_level: u32,
        synth2_cost: u32,
        synth2_unknown: u32,
        synth2_material1: u32,
        synth2_material1_amount: u32,
        synth2_material2: u32,
        synth2_material2_amount: u32,
        synth2_material3: u32,
        synth2_material3_amount: u32,
        synth2_material4: u32,
        synth2_material4_amount: u32,
        synth2_material5: u32,
        synth2_material5_amount: u32,
        synth2_material6: u32,
        synth2_material6_amount: u32,
        synth2_material_size: u32,
        synth3_level: u32,
        synth3_cost: u32,
        synth3_unknown: u32,
        synth3_material1: u32,
        synth3_material1_amount: u32,
        synth3_material2: u32,
        synth3_material2_amount: u32,
        synth3_material3: u32,
        synth3_material3_amount: u32,
        synth3_material4: u32,
        synth3_material4_amount: u32,
        synth3_material5: u32,
        synth3_material5_amount: u32,
        synth3_material6: u32,
        synth3_material6_amount: u32,
        synth3_material_size: u32,
        synth_size: u32,
        unknown7: u32,
        unknown8: u32,
        unknown9: u32,
        unknown10: u32,
        unknown11: u32,
        unknown12: u32,
        model_id: i32,
        entry: u32,
        battle_used: u32,
        show_in_book: u32,
        unknown13: u32,
        unknown14: u32,
        unknown15: u32,
        unknown16: u32,
        unknown17: u32,
        unknown18: u32,
    }
}

impl ItemEntry {
    /// Character numbers (1-based) whose bit is set in `character_usable`.
    pub fn usable_by(&self) -> Vec<u32> {
        (0..9)
            .filter(|bit| self.character_usable & (1 << bit) != 0)
            .map(|bit| bit + 1)
            .collect()
    }

    pub fn skills(&self) -> [u32; 3] {
        [self.skill1, self.skill2, self.skill3]
    }
}

record! {
    /// One row of `ITEMSORT.DAT`, which starts with a big-endian count.
    pub struct ItemSortEntry<BigEndian> {
        entry: u32,
        id: u32,
        id_sort: u32,
        phys_attack_sort: u32,
        phys_defense_sort: u32,
        magic_attack_sort: u32,
        magic_defense_sort: u32,
        padding1: u32,
        padding2: u32,
        padding3: u32,
        padding4: u32,
    }
}

impl ItemSortEntry {
    /// Sort row for a new item; every sort key is the item id.
    pub fn for_item(entry: u32, id: u32) -> Self {
        Self {
            entry,
            id,
            id_sort: id,
            phys_attack_sort: id,
            phys_defense_sort: id,
            magic_attack_sort: id,
            magic_defense_sort: id,
            ..Self::default()
        }
    }
}

record! {
    /// Shop inventory row embedded in the decompressed scenario script.
    pub struct ShopItemEntry<LittleEndian> {
        unknown0: u32,
        shop_id: u32,
        unknown1: u32,
        unknown2: u32,
        unknown3: u32,
        item_id: u32,
        unknown4: u32,
        unknown5: u32,
        unknown6: u32,
        unknown7: u32,
        unknown8: u32,
        unknown9: u32,
        unknown10: u32,
        unknown11: u32,
    }
}

impl ShopItemEntry {
    pub fn new(shop_id: u32, item_id: u32) -> Self {
        Self {
            unknown0: 0x0207_0000,
            shop_id,
            unknown1: 0x0100_0000,
            unknown2: 0x0E00_0007,
            unknown3: 0x0207_0000,
            item_id,
            unknown4: 0x0100_0000,
            unknown5: 0x0E00_0007,
            unknown6: 0x0502_0119,
            unknown7: 0xFFFF_FFFF,
            unknown8: 0x1401_0000,
            unknown9: 0x1000_0000,
            unknown10: 0x10,
            unknown11: 0x0100_0000,
        }
    }
}

record! {
    pub struct ChestHeader<LittleEndian> {
        magic_number: FixedString<8>,
        file_end: u32,
        chest_start: u32,
        chest_entries: u32,
        item_start: u32,
        item_entries: u32,
        dummy: u32,
    }
}

record! {
    /// Chest directory row. Only the id and the item count are understood.
    pub struct ChestDirectoryEntry<LittleEndian> {
        chest_id: u32,
        unknown: [u32; 14],
        item_amount: u32,
    }
}

record! {
    pub struct ChestItemEntry<LittleEndian> {
        item_id: u32,
        amount: u32,
    }
}

record! {
    pub struct SearchPointHeader<LittleEndian> {
        magic_number: FixedString<8>,
        file_size: u32,
        definition_start: u32,
        definition_entries: u32,
        content_start: u32,
        content_entries: u32,
        item_start: u32,
        item_entries: u32,
        entry_end: u32,
        padding1: u64,
        padding2: u64,
        padding3: u64,
    }
}

impl SearchPointHeader {
    pub fn verify(&self) -> Result<()> {
        verify_magic(Self::NAME, &self.magic_number, SEARCH_POINT_MAGIC)
    }
}

record! {
    pub struct SearchPointDefinitionEntry<LittleEndian> {
        index: u32,
        scenario_begin: u32,
        scenario_end: u32,
        r#type: u32,
        unknown0: u32,
        x_coord: i32,
        y_coord: i32,
        z_coord: i32,
        unknown1: u16,
        chance: u16,
        disappear_rate: u32,
        unknown2: u32,
        unknown3: u32,
        unknown4: u32,
        max_use: u16,
        unknown5: u16,
        content_index: u32,
        content_range: u32,
    }
}

record! {
    pub struct SearchPointContentEntry<LittleEndian> {
        chance: u32,
        item_index: u32,
        item_range: u32,
        padding: u32,
    }
}

record! {
    pub struct SearchPointItemEntry<LittleEndian> {
        id: u32,
        count: u32,
    }
}

record! {
    /// Header of the compiled string dictionary.
    pub struct TssHeader<LittleEndian> {
        magic_number: FixedString<4>,
        code_start: u32,
        code_length: u32,
        text_start: u32,
        entry_code_start: u32,
        entry_pointer_end: u32,
        text_length: u32,
        sector_size: u32,
    }
}
