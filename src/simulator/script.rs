//! Scripted calibration programs
//!
//! A script is a flat list of steps interpreted by the simulated channel.
//! Prompts are written without a trailing newline and block on operator
//! input, the same way the real calibration programs do.

use rand::rngs::StdRng;
use rand::Rng;

/// Slave positions reported by the zero-point program, in degrees
pub const BASE_SLAVE_POSITIONS: [f64; 14] = [
    0.9694672, 0.3920746, 1.2521667, -3.7260590, 1.5813828, -0.2735443, 0.5864258, -1.6849182,
    -1.8997559, -6.4528351, -3.1060715, 4.9742737, 2.6854431, -1.9917114,
];

const ENCODER_COUNTS: [f64; 14] = [
    63535.0, 14275.0, 45590.0, -244191.0, 207275.0, -35854.0, 38432.0, -61346.0, -69168.0,
    -422893.0, -407119.0, 651988.0, 97774.0, -72516.0,
];

const RATED_CURRENTS: [f64; 14] = [
    39.6, 11.79, 42.43, 42.43, 8.49, 8.49, 39.6, 11.79, 42.43, 42.43, 8.49, 8.49, 14.99, 14.99,
];

/// What the operator's input must look like for a prompt to proceed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accept {
    /// Anything, including an empty line
    Any,
    /// "y" or "yes", case-insensitive
    Yes,
    /// Exactly this key, case-insensitive
    Key(char),
}

impl Accept {
    pub fn accepts(&self, input: &str) -> bool {
        let input = input.trim();
        match self {
            Accept::Any => true,
            Accept::Yes => input.eq_ignore_ascii_case("y") || input.eq_ignore_ascii_case("yes"),
            Accept::Key(key) => {
                let mut chars = input.chars();
                matches!((chars.next(), chars.next()), (Some(c), None) if c.eq_ignore_ascii_case(key))
            }
        }
    }
}

/// Behaviour when the operator declines a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnReject {
    /// Print the line and end the program
    Abort(String),
    /// Print the line and skip the next `steps` script steps
    Skip { line: String, steps: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// One output line
    Line(String),
    /// Unscaled pause in milliseconds
    Pause(u64),
    Prompt {
        text: String,
        accept: Accept,
        on_reject: OnReject,
    },
}

/// A complete simulated program
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: &'static str,
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn prompt_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step, ScriptStep::Prompt { .. }))
            .count()
    }
}

/// Incremental builder keeping script definitions readable
#[derive(Default)]
struct ScriptBuilder {
    steps: Vec<ScriptStep>,
}

impl ScriptBuilder {
    fn line(&mut self, text: impl Into<String>) -> &mut Self {
        self.steps.push(ScriptStep::Line(text.into()));
        self
    }

    fn pause(&mut self, millis: u64) -> &mut Self {
        self.steps.push(ScriptStep::Pause(millis));
        self
    }

    fn prompt(&mut self, text: &str, accept: Accept, on_reject: OnReject) -> &mut Self {
        self.steps.push(ScriptStep::Prompt {
            text: text.to_string(),
            accept,
            on_reject,
        });
        self
    }

    fn len(&self) -> usize {
        self.steps.len()
    }

    fn build(self, name: &'static str) -> Script {
        Script {
            name,
            steps: self.steps,
        }
    }
}

fn abort(line: &str) -> OnReject {
    OnReject::Abort(line.to_string())
}

/// Slave positions for one run; seeded runs jitter the base values slightly
pub fn slave_positions(rng: Option<&mut StdRng>) -> Vec<f64> {
    match rng {
        Some(rng) => BASE_SLAVE_POSITIONS
            .iter()
            .map(|base| base + rng.gen_range(-0.05..0.05))
            .collect(),
        None => BASE_SLAVE_POSITIONS.to_vec(),
    }
}

/// The zero-point program
pub fn zero_point(mut rng: Option<&mut StdRng>) -> Script {
    let positions = slave_positions(rng.as_deref_mut());
    let mut s = ScriptBuilder::default();

    s.line("===========================================")
        .line("       机器人零点标定程序")
        .line("===========================================")
        .pause(1000)
        .line("检查机器人状态...")
        .pause(2000)
        .prompt("是否启动机器人控制系统？(y/N): ", Accept::Yes, abort("用户取消操作"))
        .line("正在启动机器人控制系统...");
    for i in 1..=5 {
        s.line(format!("初始化子系统 {}/5...", i)).pause(500);
    }

    s.line("").line("开始使能电机...").pause(1000);
    let mut tick = 3041u64;
    for (index, position) in positions.iter().enumerate() {
        s.line(format!(
            "{:010}: Slave {} actual position {:.7},Encoder {:.7}",
            tick,
            index + 1,
            position,
            ENCODER_COUNTS[index]
        ));
        s.line(format!(
            "{:010}: Rated current {:.7}",
            tick + 10,
            RATED_CURRENTS[index]
        ));
        tick += 20;
    }
    s.pause(1000);

    s.line("")
        .line("电机使能完成！")
        .prompt(
            "按 'o' 启动机器人（进入站立状态）: ",
            Accept::Key('o'),
            abort("未按o，退出程序"),
        )
        .line("机器人开始站立...");
    for percent in [33, 66, 99] {
        s.line(format!("站立进度: {}%", percent)).pause(1000);
    }
    s.line("机器人站立完成！").pause(1000);

    s.line("")
        .prompt("是否开始标定？(y/n): ", Accept::Yes, abort("用户取消标定"))
        .line("")
        .line("开始执行标定...")
        .line("请确认机器人关节已摆放到零位")
        .pause(2000)
        .line("正在读取当前关节位置...")
        .pause(1000)
        .line("标定数据：");
    for (index, position) in positions.iter().enumerate() {
        let value = match rng.as_deref_mut() {
            Some(rng) => rng.gen_range(-10.0..10.0),
            None => *position,
        };
        s.line(format!("关节{}: {:.6}", index + 1, value));
    }
    s.pause(1000);

    s.line("")
        .prompt("请确认标定数据是否正确？(y/n): ", Accept::Yes, abort("标定取消"))
        .line("")
        .prompt("是否保存标定结果？(y/n): ", Accept::Yes, abort("未保存标定数据"))
        .line("正在保存标定数据到 ~/.config/lejuconfig/offset.csv...")
        .pause(1000)
        .line("标定数据保存成功！")
        .line("")
        .line("零点标定完成！");

    s.build("zero_point")
}

/// The head and hand program
pub fn head_hand() -> Script {
    let mut s = ScriptBuilder::default();

    s.line("===========================================================")
        .line("           机器人关节标定一键启动脚本")
        .line("===========================================================")
        .pause(1000)
        .line("步骤1: 检查环境...")
        .pause(500)
        .line("✓ Python环境检查通过")
        .line("✓ ROS环境检查通过")
        .line("✓ 标定工具检查通过")
        .pause(1000)
        .line("")
        .prompt("是否开始一键标定流程？(y/n): ", Accept::Yes, abort("用户取消操作"))
        .line("")
        .line("步骤2: 准备启动下位机launch文件...")
        .pause(1000)
        .line("编译ROS包...");
    for package in ["kuavo_msgs", "hardware_node", "humanoid_controllers"] {
        s.line(format!("  编译 {}...", package)).pause(500);
    }
    s.line("✓ 编译完成")
        .line("")
        .line("步骤2.5: 启动机器人控制系统...");

    let mut control = ScriptBuilder::default();
    control
        .line("准备启动机器人控制系统...")
        .line("在后台启动机器人控制系统...")
        .pause(2000)
        .line("✓ 机器人控制系统已在后台启动")
        .line("")
        .line("机器人状态确认")
        .line("请观察机器人状态：")
        .line("- 机器人应该会有缩腿动作")
        .line("- 等待机器人完成缩腿动作后，需要发送站立命令")
        .line("")
        .prompt(
            "请确认机器人已经上电，按回车继续...",
            Accept::Any,
            abort("用户取消"),
        )
        .prompt(
            "机器人将开始运动，是否继续？(y/n): ",
            Accept::Yes,
            abort("用户取消"),
        )
        .line("")
        .line("机器人开始缩腿...")
        .pause(3000)
        .line("缩腿完成")
        .line("")
        .line("发送站立命令 'o' 到机器人控制系统...")
        .pause(2000)
        .line("机器人开始站立...")
        .pause(3000)
        .line("✓ 机器人站立完成");
    s.prompt(
        "是否启动机器人控制系统？(y/N): ",
        Accept::Yes,
        OnReject::Skip {
            line: "跳过机器人控制系统启动".to_string(),
            steps: control.len(),
        },
    );
    s.steps.extend(control.steps);

    s.line("")
        .line("步骤3: 启动上位机AprilTag识别系统...")
        .line("检查Python环境...")
        .pause(500)
        .line("使用Python脚本启动上位机...")
        .pause(1000)
        .line("✓ 上位机AprilTag识别系统启动完成")
        .line("")
        .line("步骤4: 启动头部标定...")
        .line("请确认：")
        .line("1. 标定工具已安装在机器人躯干上")
        .line("2. AprilTag已正确贴在标定工具上")
        .line("3. 上位机相机正常工作");

    let mut head = ScriptBuilder::default();
    head.line("")
        .line("开始头部标定...")
        .line("激活虚拟环境和设置环境...")
        .pause(1000)
        .line("执行头部标定...");
    for point in 1..=5 {
        head.line(format!("移动头部到标定位置{}...", point))
            .pause(2000)
            .line(format!("采集数据点{}/5", point))
            .pause(1000);
    }
    head.line("")
        .line("计算标定参数...")
        .pause(2000)
        .line("标定误差: 0.003mm (良好)")
        .line("✓ 头部标定完成！")
        .line("备份文件: /home/lab/.config/lejuconfig/arms_zero.yaml.head_cali.bak");
    s.prompt(
        "是否继续头部标定？(y/N): ",
        Accept::Yes,
        OnReject::Skip {
            line: "跳过头部标定".to_string(),
            steps: head.len(),
        },
    );
    s.steps.extend(head.steps);

    s.line("")
        .line("步骤5: 启动手臂标定...")
        .pause(1000)
        .line("执行手臂标定脚本...")
        .line("开始手臂标定流程...");
    for arm in ["左臂", "右臂"] {
        s.line("").line(format!("标定{}...", arm));
        for joint in 1..=7 {
            s.line(format!("  关节{}标定中...", joint)).pause(500);
        }
        s.line(format!("✓ {}标定完成", arm));
    }
    s.line("")
        .line("手臂标定完成")
        .prompt("标定完成，按任意键退出...", Accept::Any, abort(""))
        .line("")
        .line("=".repeat(51))
        .line("    jointcal head/hand calibration finished")
        .line("=".repeat(51));

    s.build("head_hand")
}

/// Output of a command the simulator does not know
pub fn unknown_command(command: &str) -> Script {
    let program = command.split_whitespace().next().unwrap_or(command);
    let mut s = ScriptBuilder::default();
    s.line(format!("bash: {}: command not found", program));
    s.build("unknown")
}
