//! Host API exposed to Lua scripts.
//!
//! Globals:
//! - `print(...)` - Routed to the script console instead of stdout
//!
//! Modules (via `require`):
//! - `luadio` - `luadio.print(...)`, `luadio.sample_rate`
//! - `oscillator` - `oscillator.new(wavetype, frequency, amplitude, sample_rate)`
//!   and `oscillator.wavetype.{sine,square,triangle,saw}`
//! - `wavetable` - `wavetable.create_with_wave_type(wavetype, length)`
//! - `ffi` - `ffi.cast(ctype, value)` returns `value` unchanged
//!
//! `on_audio_read` receives an [`AudioBlock`]: `data[i]` reads and writes
//! interleaved sample `i` (0-based), `#data` is the sample count.

use mlua::{Lua, MetaMethod, Table, UserData, UserDataMethods, Value, Variadic};

use crate::dsp::{Oscillator, Waveform, Wavetable};
use crate::script_log::{stringify_value, LogLevel, ScriptLogger};

/// Script loaded by `luadio template` and shown to new users.
pub const DEFAULT_SCRIPT: &str = r#"local luadio = require('luadio')
local oscillator = require('oscillator')

local osc1 = oscillator.new(oscillator.wavetype.sine, 440, 0.5, luadio.sample_rate)
local osc2 = oscillator.new(oscillator.wavetype.sine, 440, 0.5, luadio.sample_rate)

[SliderFloat(20, 880)]
frequency = 440.0

[SliderFloat(0.01, 10.0)]
lfo = 3.3

[SliderFloat(0.0, 1.0)]
lfoDepth = 1.0

[SliderFloat(0.0, 1.0)]
gain = 0.1

[Checkbox]
bypass = false

--Runs after compilation
function on_start()
    print('started at ' .. luadio.sample_rate .. ' Hz')
end

--Runs when stop is clicked
function on_stop()

end

--Runs every frame
function on_update(deltaTime)

end

--Runs on the audio thread
function on_audio_read(data, length, channels)
    if bypass == true then
        return
    end

    osc1:set_frequency(lfo)
    osc2:set_frequency(frequency)

    for i = 0, length - 1, channels do
        local sample = osc1:get_value()
        sample = osc2:get_modulated_value(lfoDepth * sample) * gain

        for c = 0, channels - 1 do
            data[i + c] = sample
        end
    end
end
"#;

/// Interleaved samples handed to `on_audio_read`.
#[derive(Debug, Default)]
pub struct AudioBlock {
    samples: Vec<f32>,
    len: usize,
}

impl AudioBlock {
    /// Resize the logical block to `len` zeroed samples. Never shrinks the
    /// allocation.
    pub fn reset(&mut self, len: usize) {
        if self.samples.len() < len {
            self.samples.resize(len, 0.0);
        }
        self.samples[..len].fill(0.0);
        self.len = len;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    fn slot(&self, index: i64) -> mlua::Result<usize> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < self.len)
            .ok_or_else(|| {
                mlua::Error::RuntimeError(format!(
                    "audio block index {} out of range (0..{})",
                    index, self.len
                ))
            })
    }
}

impl UserData for AudioBlock {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_, this, index: i64| {
            let slot = this.slot(index)?;
            Ok(this.samples[slot])
        });
        methods.add_meta_method_mut(
            MetaMethod::NewIndex,
            |_, this, (index, value): (i64, f32)| {
                let slot = this.slot(index)?;
                this.samples[slot] = value;
                Ok(())
            },
        );
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.len));
    }
}

fn waveform_arg(id: i64) -> mlua::Result<Waveform> {
    Waveform::from_id(id).ok_or_else(|| {
        mlua::Error::RuntimeError(format!("bad argument: unknown wave type {}", id))
    })
}

fn wavetype_table(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    for waveform in Waveform::ALL {
        table.set(waveform.name(), waveform as i64)?;
    }
    Ok(table)
}

struct LuaOscillator(Oscillator);

impl UserData for LuaOscillator {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("set_type", |_, this, id: i64| {
            this.0.set_waveform(waveform_arg(id)?);
            Ok(())
        });
        methods.add_method_mut("set_frequency", |_, this, frequency: f64| {
            this.0.set_frequency(frequency);
            Ok(())
        });
        methods.add_method_mut("set_phase", |_, this, phase: f64| {
            this.0.set_phase(phase);
            Ok(())
        });
        methods.add_method_mut("set_amplitude", |_, this, amplitude: f64| {
            this.0.set_amplitude(amplitude);
            Ok(())
        });
        methods.add_method_mut("reset", |_, this, ()| {
            this.0.reset();
            Ok(())
        });
        methods.add_method_mut("get_value", |_, this, ()| Ok(this.0.next_value()));
        methods.add_method("get_value_at_phase", |_, this, phase: f64| {
            Ok(this.0.value_at_phase(phase))
        });
        methods.add_method_mut("get_modulated_value", |_, this, modulation: f64| {
            Ok(this.0.next_modulated_value(modulation))
        });
    }
}

struct LuaWavetable(Wavetable);

impl UserData for LuaWavetable {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut(
            "get_value",
            |_, this, (frequency, sample_rate): (f64, f64)| {
                Ok(this.0.next_value(frequency, sample_rate))
            },
        );
        methods.add_method_mut("reset", |_, this, ()| {
            this.0.reset();
            Ok(())
        });
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.0.len()));
    }
}

fn print_function(lua: &Lua, logger: ScriptLogger) -> mlua::Result<mlua::Function> {
    lua.create_function(move |_, args: Variadic<Value>| {
        let text = args
            .iter()
            .map(stringify_value)
            .collect::<Vec<_>>()
            .join("\t");
        logger.script(LogLevel::Info, text);
        Ok(())
    })
}

fn luadio_module(lua: &Lua, logger: ScriptLogger, sample_rate: u32) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set("print", print_function(lua, logger)?)?;
    module.set("sample_rate", sample_rate)?;
    Ok(module)
}

fn oscillator_module(lua: &Lua) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set("wavetype", wavetype_table(lua)?)?;
    module.set(
        "new",
        lua.create_function(
            |_, (id, frequency, amplitude, sample_rate): (i64, f64, f64, f64)| {
                let waveform = waveform_arg(id)?;
                Ok(LuaOscillator(Oscillator::new(
                    waveform,
                    frequency,
                    amplitude,
                    sample_rate,
                )))
            },
        )?,
    )?;
    Ok(module)
}

fn wavetable_module(lua: &Lua) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set("wavetype", wavetype_table(lua)?)?;
    module.set(
        "create_with_wave_type",
        lua.create_function(|_, (id, length): (i64, usize)| {
            let waveform = waveform_arg(id)?;
            Ok(LuaWavetable(Wavetable::with_waveform(waveform, length)))
        })?,
    )?;
    Ok(module)
}

fn ffi_module(lua: &Lua) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set(
        "cast",
        lua.create_function(|_, (_ctype, value): (Value, Value)| Ok(value))?,
    )?;
    Ok(module)
}

/// Register `name` in `package.preload`, built lazily on first `require`.
fn preload<F>(lua: &Lua, name: &str, build: F) -> mlua::Result<()>
where
    F: Fn(&Lua) -> mlua::Result<Table> + mlua::MaybeSend + 'static,
{
    let package: Table = lua.globals().get("package")?;
    let preload: Table = package.get("preload")?;
    preload.set(name, lua.create_function(move |lua, _: Variadic<Value>| build(lua))?)
}

/// Install the host API into a fresh interpreter.
pub fn register_api(lua: &Lua, logger: ScriptLogger, sample_rate: u32) -> mlua::Result<()> {
    lua.globals().set("print", print_function(lua, logger.clone())?)?;

    preload(lua, "luadio", move |lua| {
        luadio_module(lua, logger.clone(), sample_rate)
    })?;
    preload(lua, "oscillator", oscillator_module)?;
    preload(lua, "wavetable", wavetable_module)?;
    preload(lua, "ffi", ffi_module)?;

    log::debug!("Registered script API (sample rate {} Hz)", sample_rate);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_log::{channel, LogConsole};

    fn lua_with_api() -> (Lua, LogConsole) {
        let lua = Lua::new();
        let (logger, console) = channel(100, 100);
        register_api(&lua, logger, 48_000).unwrap();
        (lua, console)
    }

    #[test]
    fn test_print_is_routed() {
        let (lua, mut console) = lua_with_api();
        lua.load("print('hello', 1, 2.5, nil, true)").exec().unwrap();
        console.poll();
        let entry = console.entries().next().unwrap();
        assert_eq!(entry.message, "hello\t1\t2.5\tnil\ttrue");
    }

    #[test]
    fn test_luadio_module() {
        let (lua, mut console) = lua_with_api();
        let rate: u32 = lua
            .load("local l = require('luadio'); l.print('x'); return l.sample_rate")
            .eval()
            .unwrap();
        assert_eq!(rate, 48_000);
        assert_eq!(console.poll(), 1);
    }

    #[test]
    fn test_oscillator_module() {
        let (lua, _console) = lua_with_api();
        let value: f64 = lua
            .load(
                r#"
                local oscillator = require('oscillator')
                local osc = oscillator.new(oscillator.wavetype.sine, 440, 0.5, 44100)
                osc:set_frequency(220)
                osc:set_amplitude(2.0)
                return osc:get_value_at_phase(math.pi / 2)
                "#,
            )
            .eval()
            .unwrap();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_wave_type() {
        let (lua, _console) = lua_with_api();
        let err = lua
            .load("require('oscillator').new(9, 440, 1, 44100)")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("unknown wave type 9"));
    }

    #[test]
    fn test_wavetable_module() {
        let (lua, _console) = lua_with_api();
        let (first, len): (f64, usize) = lua
            .load(
                r#"
                local wavetable = require('wavetable')
                local t = wavetable.create_with_wave_type(wavetable.wavetype.saw, 64)
                return t:get_value(440, 44100), #t
                "#,
            )
            .eval()
            .unwrap();
        assert!((first + 1.0).abs() < 1e-9);
        assert_eq!(len, 64);
    }

    #[test]
    fn test_ffi_cast_passthrough() {
        let (lua, _console) = lua_with_api();
        let same: bool = lua
            .load("local t = {} return require('ffi').cast('float*', t) == t")
            .eval()
            .unwrap();
        assert!(same);
    }

    #[test]
    fn test_audio_block_indexing() {
        let lua = Lua::new();
        let mut block = AudioBlock::default();
        block.reset(4);
        let ud = lua.create_userdata(block).unwrap();
        lua.globals().set("data", ud.clone()).unwrap();

        lua.load("for i = 0, #data - 1 do data[i] = i * 0.5 end")
            .exec()
            .unwrap();
        let block = ud.borrow::<AudioBlock>().unwrap();
        assert_eq!(block.as_slice(), &[0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_audio_block_out_of_range() {
        let lua = Lua::new();
        let mut block = AudioBlock::default();
        block.reset(2);
        lua.globals().set("data", block).unwrap();

        let err = lua.load("data[2] = 1.0").exec().unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(lua.load("return data[-1]").exec().is_err());
    }

    #[test]
    fn test_audio_block_reset_keeps_allocation() {
        let mut block = AudioBlock::default();
        block.reset(8);
        block.samples[3] = 1.0;
        block.reset(4);
        assert_eq!(block.len(), 4);
        assert!(block.samples.len() >= 8);
        assert!(block.as_slice().iter().all(|s| *s == 0.0));
    }
}
